use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StorageError;
use crate::models::game::DiceGame;
use crate::models::player::PlayerStats;
use crate::models::room::{MatchRecord, RoomMeta};
use crate::repository::{RoomData, Storage};

#[derive(Serialize, Deserialize, Debug, Default)]
struct FileData {
    rooms: HashMap<i64, RoomData>,
}

/// Flat-file JSON backend: the whole data set lives in one file and is
/// rewritten after every mutation. Suited to single-process deployments
/// without a database.
pub struct FileRepository {
    path: PathBuf,
    state: Mutex<FileData>,
}

impl FileRepository {
    /// Loads the data file, starting empty when it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "data file not found, starting empty");
                FileData::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(FileRepository { path, state: Mutex::new(state) })
    }

    /// Mutates under the lock and rewrites the file before releasing it, so
    /// writes never interleave.
    async fn mutate<T>(
        &self,
        room_id: i64,
        f: impl FnOnce(&mut RoomData) -> T,
    ) -> Result<T, StorageError> {
        let mut state = self.state.lock().await;
        let result = f(state.rooms.entry(room_id).or_default());
        let bytes = serde_json::to_vec_pretty(&*state)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(result)
    }

    async fn read<T>(
        &self,
        room_id: i64,
        f: impl FnOnce(Option<&RoomData>) -> T,
    ) -> T {
        let state = self.state.lock().await;
        f(state.rooms.get(&room_id))
    }
}

#[async_trait]
impl Storage for FileRepository {
    async fn get_or_create_player(
        &self,
        room_id: i64,
        user_id: i64,
        username: &str,
        starting_score: i64,
    ) -> Result<PlayerStats, StorageError> {
        self.mutate(room_id, |room| {
            room.get_or_create_player(user_id, username, starting_score).clone()
        })
        .await
    }

    async fn get_score(&self, room_id: i64, user_id: i64) -> Result<i64, StorageError> {
        Ok(self
            .read(room_id, |room| {
                room.and_then(|r| r.players.get(&user_id)).map(|p| p.score).unwrap_or(0)
            })
            .await)
    }

    async fn adjust_score(
        &self,
        room_id: i64,
        user_id: i64,
        delta: i64,
        outcome: Option<bool>,
        bet_count: i64,
    ) -> Result<(), StorageError> {
        self.mutate(room_id, |room| room.adjust_score(user_id, delta, outcome, bet_count))
            .await
    }

    async fn get_room_meta(&self, room_id: i64) -> Result<RoomMeta, StorageError> {
        Ok(self
            .read(room_id, |room| room.map(|r| r.meta.clone()).unwrap_or_default())
            .await)
    }

    async fn increment_match_counter(&self, room_id: i64) -> Result<i64, StorageError> {
        self.mutate(room_id, |room| {
            room.meta.match_counter += 1;
            room.meta.match_counter
        })
        .await
    }

    async fn set_idle_matches(&self, room_id: i64, count: u32) -> Result<(), StorageError> {
        self.mutate(room_id, |room| room.meta.consecutive_idle_matches = count).await
    }

    async fn set_cooldown_until(
        &self,
        room_id: i64,
        until: Option<i64>,
    ) -> Result<(), StorageError> {
        self.mutate(room_id, |room| room.meta.cooldown_until = until).await
    }

    async fn append_match_history(
        &self,
        room_id: i64,
        record: &MatchRecord,
    ) -> Result<(), StorageError> {
        self.mutate(room_id, |room| room.push_history(record.clone())).await
    }

    async fn get_recent_matches(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        Ok(self
            .read(room_id, |room| {
                room.map(|r| r.recent_matches(limit)).unwrap_or_default()
            })
            .await)
    }

    async fn get_leaderboard(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<PlayerStats>, StorageError> {
        Ok(self
            .read(room_id, |room| room.map(|r| r.leaderboard(limit)).unwrap_or_default())
            .await)
    }

    async fn save_active_match(&self, game: &DiceGame) -> Result<(), StorageError> {
        self.mutate(game.room_id, |room| room.active_match = Some(game.clone())).await
    }

    async fn load_active_match(&self, room_id: i64) -> Result<Option<DiceGame>, StorageError> {
        Ok(self.read(room_id, |room| room.and_then(|r| r.active_match.clone())).await)
    }

    async fn clear_active_match(&self, room_id: i64) -> Result<(), StorageError> {
        self.mutate(room_id, |room| room.active_match = None).await
    }

    async fn rooms_with_active_match(&self) -> Result<Vec<i64>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .rooms
            .iter()
            .filter(|(_, data)| data.active_match.is_some())
            .map(|(id, _)| *id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::room::MatchRecord;
    use tempdir::TempDir;

    fn data_path(dir: &TempDir) -> PathBuf {
        dir.path().join("data.json")
    }

    #[tokio::test]
    async fn state_survives_a_reopen() {
        let dir = TempDir::new("file_repository").unwrap();
        let path = data_path(&dir);

        {
            let repo = FileRepository::open(&path).await.unwrap();
            repo.get_or_create_player(1, 10, "alice", 500).await.unwrap();
            repo.adjust_score(1, 10, -100, None, 1).await.unwrap();
            repo.increment_match_counter(1).await.unwrap();
            repo.set_cooldown_until(1, Some(12345)).await.unwrap();
        }

        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.get_score(1, 10).await.unwrap(), 400);
        let meta = repo.get_room_meta(1).await.unwrap();
        assert_eq!(meta.match_counter, 1);
        assert_eq!(meta.cooldown_until, Some(12345));
    }

    #[tokio::test]
    async fn history_is_capped_at_fifty_entries() {
        let dir = TempDir::new("file_repository").unwrap();
        let repo = FileRepository::open(data_path(&dir)).await.unwrap();

        for match_id in 1..=60 {
            repo.append_match_history(1, &MatchRecord::voided(match_id, 0)).await.unwrap();
        }

        let recent = repo.get_recent_matches(1, 100).await.unwrap();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().match_id, 11);
        assert_eq!(recent.last().unwrap().match_id, 60);
    }

    #[tokio::test]
    async fn active_match_survives_a_reopen() {
        let dir = TempDir::new("file_repository").unwrap();
        let path = data_path(&dir);

        {
            let repo = FileRepository::open(&path).await.unwrap();
            let mut game = DiceGame::new(9, 5);
            game.close().unwrap();
            game.record_dice((2, 3));
            repo.save_active_match(&game).await.unwrap();
        }

        let repo = FileRepository::open(&path).await.unwrap();
        assert_eq!(repo.rooms_with_active_match().await.unwrap(), vec![5]);
        let game = repo.load_active_match(5).await.unwrap().unwrap();
        assert_eq!(game.match_id, 9);
        assert_eq!(game.dice, Some((2, 3)));
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = TempDir::new("file_repository").unwrap();
        let repo = FileRepository::open(data_path(&dir)).await.unwrap();
        assert_eq!(repo.get_score(1, 1).await.unwrap(), 0);
        assert!(repo.get_recent_matches(1, 10).await.unwrap().is_empty());
    }
}
