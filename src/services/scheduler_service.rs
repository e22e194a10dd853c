use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::config::settings::Settings;
use crate::error::GameError;
use crate::game::payout::PayoutTable;
use crate::models::bet::{BetReceipt, BetType};
use crate::models::event::GameEvent;
use crate::models::game::MatchSnapshot;
use crate::models::player::PlayerStats;
use crate::models::room::{MatchRecord, RefundSummary};
use crate::repository::Storage;
use crate::services::room_service::{roll_dice, RoomHandle, RoomService};

/// Owns one room worker per room, created lazily on first use and retained
/// for the process lifetime. All access to a room's match goes through the
/// worker's mailbox; nothing here mutates game state directly.
pub struct GameScheduler {
    settings: Arc<Settings>,
    payout: Arc<PayoutTable>,
    storage: Arc<dyn Storage>,
    rooms: Mutex<HashMap<i64, RoomHandle>>,
    events: broadcast::Sender<GameEvent>,
    dice_roller: fn() -> (u8, u8),
}

impl GameScheduler {
    pub fn new(settings: Arc<Settings>, payout: PayoutTable, storage: Arc<dyn Storage>) -> Self {
        Self::with_dice_roller(settings, payout, storage, roll_dice)
    }

    /// Like `new`, with an injected dice source for deterministic tests.
    pub fn with_dice_roller(
        settings: Arc<Settings>,
        payout: PayoutTable,
        storage: Arc<dyn Storage>,
        dice_roller: fn() -> (u8, u8),
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        GameScheduler {
            settings,
            payout: Arc::new(payout),
            storage,
            rooms: Mutex::new(HashMap::new()),
            events,
            dice_roller,
        }
    }

    /// Startup recovery: instantiate a worker for every room that still has
    /// a persisted live match, so interrupted matches are resolved now and
    /// not when the room next sees traffic.
    pub async fn recover_all(&self) -> Result<(), GameError> {
        let rooms = self.storage.rooms_with_active_match().await?;
        if !rooms.is_empty() {
            info!(rooms = rooms.len(), "recovering rooms with interrupted matches");
        }
        for room_id in rooms {
            self.room(room_id).await?;
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub async fn start_match(&self, room_id: i64, operator: i64) -> Result<MatchSnapshot, GameError> {
        self.room(room_id).await?.start_match(operator).await
    }

    pub async fn place_bet(
        &self,
        room_id: i64,
        player_id: i64,
        username: String,
        category: &str,
        amount: i64,
    ) -> Result<BetReceipt, GameError> {
        let bet_type: BetType = category.parse()?;
        self.room(room_id)
            .await?
            .place_bet(player_id, username, bet_type, amount)
            .await
    }

    pub async fn close_betting(&self, room_id: i64, operator: i64) -> Result<MatchSnapshot, GameError> {
        self.room(room_id).await?.close_betting(operator).await
    }

    pub async fn stop_match(&self, room_id: i64, operator: i64) -> Result<RefundSummary, GameError> {
        self.room(room_id).await?.stop_match(operator).await
    }

    pub async fn get_status(&self, room_id: i64) -> Result<MatchSnapshot, GameError> {
        self.room(room_id).await?.status().await
    }

    pub async fn get_leaderboard(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<PlayerStats>, GameError> {
        Ok(self.storage.get_leaderboard(room_id, limit).await?)
    }

    pub async fn get_history(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, GameError> {
        Ok(self.storage.get_recent_matches(room_id, limit).await?)
    }

    async fn room(&self, room_id: i64) -> Result<RoomHandle, GameError> {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(&room_id) {
            return Ok(handle.clone());
        }
        let handle = RoomService::spawn(
            room_id,
            Arc::clone(&self.settings),
            Arc::clone(&self.payout),
            Arc::clone(&self.storage),
            self.events.clone(),
            self.dice_roller,
        )
        .await?;
        rooms.insert(room_id, handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::models::bet::BetType;
    use crate::models::game::{DiceGame, GameState};
    use crate::repository::memory_repository::MemoryRepository;
    use std::time::Duration;

    fn big_dice() -> (u8, u8) {
        (5, 4)
    }

    fn scheduler_with(
        repo: Arc<MemoryRepository>,
        dice_roller: fn() -> (u8, u8),
    ) -> GameScheduler {
        let settings = Arc::new(Settings::default());
        let payout = PayoutTable::from_settings(&settings).unwrap();
        GameScheduler::with_dice_roller(
            settings,
            payout,
            Arc::clone(&repo) as Arc<dyn Storage>,
            dice_roller,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_category_is_rejected_before_any_debit() {
        let repo = Arc::new(MemoryRepository::new());
        let scheduler = scheduler_with(Arc::clone(&repo), big_dice);

        scheduler.start_match(1, 99).await.unwrap();
        match scheduler.place_bet(1, 11, "alice".into(), "seven", 100).await {
            Err(GameError::InvalidCategory(raw)) => assert_eq!(raw, "seven"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn category_shortcuts_are_accepted() {
        let repo = Arc::new(MemoryRepository::new());
        repo.get_or_create_player(1, 11, "alice", 1_000).await.unwrap();
        let scheduler = scheduler_with(Arc::clone(&repo), big_dice);

        scheduler.start_match(1, 99).await.unwrap();
        let receipt = scheduler.place_bet(1, 11, "alice".into(), "b", 100).await.unwrap();
        assert_eq!(receipt.bet_type, BetType::Big);
    }

    #[tokio::test(start_paused = true)]
    async fn rooms_progress_independently() {
        let repo = Arc::new(MemoryRepository::new());
        let scheduler = scheduler_with(Arc::clone(&repo), big_dice);

        scheduler.start_match(1, 99).await.unwrap();
        scheduler.start_match(2, 99).await.unwrap();

        scheduler.stop_match(1, 99).await.unwrap();
        // room 1 is cooling down, room 2 still has its live match
        assert!(matches!(scheduler.get_status(1).await, Err(GameError::NoActiveMatch)));
        let status = scheduler.get_status(2).await.unwrap();
        assert_eq!(status.state, GameState::Waiting);
        assert!(matches!(
            scheduler.start_match(1, 99).await,
            Err(GameError::CooldownActive(_))
        ));
        assert!(matches!(scheduler.start_match(2, 99).await, Err(GameError::AlreadyActive)));
    }

    #[tokio::test(start_paused = true)]
    async fn leaderboard_and_history_pass_through_storage() {
        let repo = Arc::new(MemoryRepository::new());
        repo.get_or_create_player(1, 11, "alice", 1_000).await.unwrap();
        repo.get_or_create_player(1, 12, "bob", 2_000).await.unwrap();
        let scheduler = scheduler_with(Arc::clone(&repo), big_dice);

        scheduler.start_match(1, 99).await.unwrap();
        scheduler.place_bet(1, 11, "alice".into(), "big", 100).await.unwrap();
        tokio::time::sleep(Duration::from_secs(66)).await;

        let history = scheduler.get_history(1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].winning_type, Some(BetType::Big));

        let board = scheduler.get_leaderboard(1, 10).await.unwrap();
        assert_eq!(board[0].user_id, 12); // bob still leads
        assert_eq!(board[1].user_id, 11);
        assert_eq!(board[1].score, 1_100);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_all_resolves_interrupted_rooms_at_startup() {
        let repo = Arc::new(MemoryRepository::new());
        repo.get_or_create_player(7, 11, "alice", 900).await.unwrap();
        let mut game = DiceGame::new(1, 7);
        game.bets.record(crate::models::bet::Bet {
            player_id: 11,
            username: "alice".into(),
            bet_type: BetType::Big,
            amount: 100,
            placed_at: chrono::Utc::now(),
        });
        game.close().unwrap();
        repo.save_active_match(&game).await.unwrap();

        let scheduler = scheduler_with(Arc::clone(&repo), big_dice);
        scheduler.recover_all().await.unwrap();

        // the closed match had no dice: voided, stake refunded
        assert_eq!(repo.get_score(7, 11).await.unwrap(), 1_000);
        assert!(repo.rooms_with_active_match().await.unwrap().is_empty());
        let history = repo.get_recent_matches(7, 10).await.unwrap();
        assert!(history[0].voided);
    }
}
