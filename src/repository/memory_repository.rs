use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::game::DiceGame;
use crate::models::player::PlayerStats;
use crate::models::room::{MatchRecord, RoomMeta};
use crate::repository::{RoomData, Storage};

/// Storage backend with no persistence. Backs engine tests and can run a
/// throwaway server.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    rooms: Arc<Mutex<HashMap<i64, RoomData>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    fn with_room<T>(&self, room_id: i64, f: impl FnOnce(&mut RoomData) -> T) -> T {
        let mut rooms = self.rooms.lock().expect("room state poisoned");
        f(rooms.entry(room_id).or_default())
    }
}

#[async_trait]
impl Storage for MemoryRepository {
    async fn get_or_create_player(
        &self,
        room_id: i64,
        user_id: i64,
        username: &str,
        starting_score: i64,
    ) -> Result<PlayerStats, StorageError> {
        Ok(self.with_room(room_id, |room| {
            room.get_or_create_player(user_id, username, starting_score).clone()
        }))
    }

    async fn get_score(&self, room_id: i64, user_id: i64) -> Result<i64, StorageError> {
        Ok(self.with_room(room_id, |room| {
            room.players.get(&user_id).map(|p| p.score).unwrap_or(0)
        }))
    }

    async fn adjust_score(
        &self,
        room_id: i64,
        user_id: i64,
        delta: i64,
        outcome: Option<bool>,
        bet_count: i64,
    ) -> Result<(), StorageError> {
        self.with_room(room_id, |room| room.adjust_score(user_id, delta, outcome, bet_count));
        Ok(())
    }

    async fn get_room_meta(&self, room_id: i64) -> Result<RoomMeta, StorageError> {
        Ok(self.with_room(room_id, |room| room.meta.clone()))
    }

    async fn increment_match_counter(&self, room_id: i64) -> Result<i64, StorageError> {
        Ok(self.with_room(room_id, |room| {
            room.meta.match_counter += 1;
            room.meta.match_counter
        }))
    }

    async fn set_idle_matches(&self, room_id: i64, count: u32) -> Result<(), StorageError> {
        self.with_room(room_id, |room| room.meta.consecutive_idle_matches = count);
        Ok(())
    }

    async fn set_cooldown_until(
        &self,
        room_id: i64,
        until: Option<i64>,
    ) -> Result<(), StorageError> {
        self.with_room(room_id, |room| room.meta.cooldown_until = until);
        Ok(())
    }

    async fn append_match_history(
        &self,
        room_id: i64,
        record: &MatchRecord,
    ) -> Result<(), StorageError> {
        self.with_room(room_id, |room| room.push_history(record.clone()));
        Ok(())
    }

    async fn get_recent_matches(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        Ok(self.with_room(room_id, |room| room.recent_matches(limit)))
    }

    async fn get_leaderboard(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<PlayerStats>, StorageError> {
        Ok(self.with_room(room_id, |room| room.leaderboard(limit)))
    }

    async fn save_active_match(&self, game: &DiceGame) -> Result<(), StorageError> {
        self.with_room(game.room_id, |room| room.active_match = Some(game.clone()));
        Ok(())
    }

    async fn load_active_match(&self, room_id: i64) -> Result<Option<DiceGame>, StorageError> {
        Ok(self.with_room(room_id, |room| room.active_match.clone()))
    }

    async fn clear_active_match(&self, room_id: i64) -> Result<(), StorageError> {
        self.with_room(room_id, |room| room.active_match = None);
        Ok(())
    }

    async fn rooms_with_active_match(&self) -> Result<Vec<i64>, StorageError> {
        let rooms = self.rooms.lock().expect("room state poisoned");
        Ok(rooms
            .iter()
            .filter(|(_, data)| data.active_match.is_some())
            .map(|(id, _)| *id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scores_and_stats_accumulate() {
        let repo = MemoryRepository::new();
        repo.get_or_create_player(1, 10, "alice", 500).await.unwrap();
        repo.adjust_score(1, 10, -100, None, 1).await.unwrap();
        repo.adjust_score(1, 10, 200, Some(true), 0).await.unwrap();

        let stats = repo.get_or_create_player(1, 10, "alice", 500).await.unwrap();
        assert_eq!(stats.score, 600);
        assert_eq!(stats.total_bets, 1);
        assert_eq!(stats.total_wins, 1);
        assert_eq!(stats.total_losses, 0);
    }

    #[tokio::test]
    async fn starting_score_applies_only_once() {
        let repo = MemoryRepository::new();
        repo.get_or_create_player(1, 10, "alice", 500).await.unwrap();
        repo.adjust_score(1, 10, -500, None, 1).await.unwrap();
        let stats = repo.get_or_create_player(1, 10, "alice", 500).await.unwrap();
        assert_eq!(stats.score, 0);
    }

    #[tokio::test]
    async fn match_counter_is_monotonic_per_room() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.increment_match_counter(1).await.unwrap(), 1);
        assert_eq!(repo.increment_match_counter(1).await.unwrap(), 2);
        assert_eq!(repo.increment_match_counter(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leaderboard_sorts_by_score_descending() {
        let repo = MemoryRepository::new();
        repo.get_or_create_player(1, 10, "alice", 100).await.unwrap();
        repo.get_or_create_player(1, 11, "bob", 300).await.unwrap();
        repo.get_or_create_player(1, 12, "carol", 200).await.unwrap();

        let board = repo.get_leaderboard(1, 2).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, 11);
        assert_eq!(board[1].user_id, 12);
    }

    #[tokio::test]
    async fn active_match_round_trip() {
        let repo = MemoryRepository::new();
        let game = DiceGame::new(4, 77);
        repo.save_active_match(&game).await.unwrap();
        assert_eq!(repo.rooms_with_active_match().await.unwrap(), vec![77]);

        let loaded = repo.load_active_match(77).await.unwrap().unwrap();
        assert_eq!(loaded.match_id, 4);

        repo.clear_active_match(77).await.unwrap();
        assert!(repo.load_active_match(77).await.unwrap().is_none());
        assert!(repo.rooms_with_active_match().await.unwrap().is_empty());
    }
}
