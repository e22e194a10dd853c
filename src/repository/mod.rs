pub mod file_repository;
pub mod memory_repository;
pub mod mongo_repository;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::game::DiceGame;
use crate::models::player::PlayerStats;
use crate::models::room::{MatchRecord, RoomMeta};

/// History entries kept per room by the in-process backends.
const MAX_HISTORY: usize = 50;

/// Storage contract consumed by the match engine. Implemented by the mongo,
/// flat-file, and in-memory repositories; the engine never knows which
/// backend is active. Each call is atomic on its own; the per-room worker
/// serializes related calls.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetches a player's record, creating it with `starting_score` when the
    /// player is new. Refreshes the stored username when it changed.
    async fn get_or_create_player(
        &self,
        room_id: i64,
        user_id: i64,
        username: &str,
        starting_score: i64,
    ) -> Result<PlayerStats, StorageError>;

    async fn get_score(&self, room_id: i64, user_id: i64) -> Result<i64, StorageError>;

    /// Applies a score delta and the matching stat updates. `outcome` is
    /// `None` for debits and refunds (no win/loss recorded), `Some(is_win)`
    /// at settlement. `bet_count` adjusts the lifetime bet counter.
    async fn adjust_score(
        &self,
        room_id: i64,
        user_id: i64,
        delta: i64,
        outcome: Option<bool>,
        bet_count: i64,
    ) -> Result<(), StorageError>;

    /// Current persistent counters for a room (zeroed for a new room).
    async fn get_room_meta(&self, room_id: i64) -> Result<RoomMeta, StorageError>;

    /// Bumps the monotonic match counter and returns the new value.
    async fn increment_match_counter(&self, room_id: i64) -> Result<i64, StorageError>;

    async fn set_idle_matches(&self, room_id: i64, count: u32) -> Result<(), StorageError>;

    async fn set_cooldown_until(
        &self,
        room_id: i64,
        until: Option<i64>,
    ) -> Result<(), StorageError>;

    async fn append_match_history(
        &self,
        room_id: i64,
        record: &MatchRecord,
    ) -> Result<(), StorageError>;

    /// Most recent matches, newest last.
    async fn get_recent_matches(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StorageError>;

    /// Top players by score, highest first.
    async fn get_leaderboard(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<PlayerStats>, StorageError>;

    /// Persists the live match so a crash while WAITING or CLOSED is
    /// recoverable on restart.
    async fn save_active_match(&self, game: &DiceGame) -> Result<(), StorageError>;

    async fn load_active_match(&self, room_id: i64) -> Result<Option<DiceGame>, StorageError>;

    async fn clear_active_match(&self, room_id: i64) -> Result<(), StorageError>;

    /// Rooms that still hold a persisted live match, for the startup
    /// recovery pass.
    async fn rooms_with_active_match(&self) -> Result<Vec<i64>, StorageError>;
}

/// Per-room state as held by the flat-file and in-memory backends. Mirrors
/// the flat data file layout: player stats, counters, history, live match.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RoomData {
    pub players: HashMap<i64, PlayerStats>,
    pub meta: RoomMeta,
    pub match_history: Vec<MatchRecord>,
    pub active_match: Option<DiceGame>,
}

impl RoomData {
    pub fn get_or_create_player(
        &mut self,
        user_id: i64,
        username: &str,
        starting_score: i64,
    ) -> &mut PlayerStats {
        let stats = self
            .players
            .entry(user_id)
            .or_insert_with(|| PlayerStats::new(user_id, username, starting_score));
        if !username.is_empty() && stats.username != username {
            stats.username = username.to_string();
        }
        stats
    }

    pub fn adjust_score(&mut self, user_id: i64, delta: i64, outcome: Option<bool>, bet_count: i64) {
        let stats = self.get_or_create_player(user_id, "", 0);
        stats.score += delta;
        stats.total_bets += bet_count;
        match outcome {
            Some(true) => stats.total_wins += 1,
            Some(false) => stats.total_losses += 1,
            None => {}
        }
        stats.last_active = Utc::now();
    }

    pub fn push_history(&mut self, record: MatchRecord) {
        self.match_history.push(record);
        if self.match_history.len() > MAX_HISTORY {
            let excess = self.match_history.len() - MAX_HISTORY;
            self.match_history.drain(..excess);
        }
    }

    pub fn recent_matches(&self, limit: usize) -> Vec<MatchRecord> {
        let skip = self.match_history.len().saturating_sub(limit);
        self.match_history[skip..].to_vec()
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<PlayerStats> {
        let mut players: Vec<PlayerStats> = self.players.values().cloned().collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));
        players.truncate(limit);
        players
    }
}
