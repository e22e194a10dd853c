use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, UpdateOptions};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::game::DiceGame;
use crate::models::player::PlayerStats;
use crate::models::room::{MatchRecord, RoomMeta};
use crate::repository::Storage;

const DB_NAME: &str = "diceroom";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct PlayerDoc {
    room_id: i64,
    #[serde(flatten)]
    stats: PlayerStats,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RoomDoc {
    room_id: i64,
    #[serde(default)]
    match_counter: i64,
    #[serde(default)]
    consecutive_idle_matches: u32,
    #[serde(default)]
    cooldown_until: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct HistoryDoc {
    room_id: i64,
    #[serde(flatten)]
    record: MatchRecord,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ActiveMatchDoc {
    room_id: i64,
    game: DiceGame,
}

/// MongoDB backend. One collection per concern; score updates go through
/// `$inc` so concurrent rooms never clobber each other.
#[derive(Clone)]
pub struct MongoRepository {
    players: Collection<PlayerDoc>,
    rooms: Collection<RoomDoc>,
    history: Collection<HistoryDoc>,
    active_matches: Collection<ActiveMatchDoc>,
}

impl MongoRepository {
    pub fn new(client: &Client) -> Self {
        let db = client.database(DB_NAME);
        MongoRepository {
            players: db.collection::<PlayerDoc>("players"),
            rooms: db.collection::<RoomDoc>("rooms"),
            history: db.collection::<HistoryDoc>("match_history"),
            active_matches: db.collection::<ActiveMatchDoc>("active_matches"),
        }
    }
}

#[async_trait]
impl Storage for MongoRepository {
    async fn get_or_create_player(
        &self,
        room_id: i64,
        user_id: i64,
        username: &str,
        starting_score: i64,
    ) -> Result<PlayerStats, StorageError> {
        let filter = doc! { "room_id": room_id, "user_id": user_id };
        if let Some(mut found) = self.players.find_one(filter.clone(), None).await? {
            if !username.is_empty() && found.stats.username != username {
                self.players
                    .update_one(filter, doc! { "$set": { "username": username } }, None)
                    .await?;
                found.stats.username = username.to_string();
            }
            return Ok(found.stats);
        }

        let fresh = PlayerDoc {
            room_id,
            stats: PlayerStats::new(user_id, username, starting_score),
        };
        self.players.insert_one(&fresh, None).await?;
        Ok(fresh.stats)
    }

    async fn get_score(&self, room_id: i64, user_id: i64) -> Result<i64, StorageError> {
        let filter = doc! { "room_id": room_id, "user_id": user_id };
        Ok(self
            .players
            .find_one(filter, None)
            .await?
            .map(|p| p.stats.score)
            .unwrap_or(0))
    }

    async fn adjust_score(
        &self,
        room_id: i64,
        user_id: i64,
        delta: i64,
        outcome: Option<bool>,
        bet_count: i64,
    ) -> Result<(), StorageError> {
        let mut inc = doc! { "score": delta, "total_bets": bet_count };
        match outcome {
            Some(true) => inc.insert("total_wins", 1i64),
            Some(false) => inc.insert("total_losses", 1i64),
            None => None,
        };
        let update = doc! {
            "$inc": inc,
            "$set": { "last_active": Utc::now().to_rfc3339() },
        };

        let filter = doc! { "room_id": room_id, "user_id": user_id };
        let result = self.players.update_one(filter, update.clone(), None).await?;
        if result.matched_count == 0 {
            // Settlement can touch a player that was never read in this
            // process; create the record and retry once.
            self.get_or_create_player(room_id, user_id, "", 0).await?;
            self.players
                .update_one(doc! { "room_id": room_id, "user_id": user_id }, update, None)
                .await?;
        }
        Ok(())
    }

    async fn get_room_meta(&self, room_id: i64) -> Result<RoomMeta, StorageError> {
        let room = self.rooms.find_one(doc! { "room_id": room_id }, None).await?;
        Ok(room
            .map(|r| RoomMeta {
                match_counter: r.match_counter,
                consecutive_idle_matches: r.consecutive_idle_matches,
                cooldown_until: r.cooldown_until,
            })
            .unwrap_or_default())
    }

    async fn increment_match_counter(&self, room_id: i64) -> Result<i64, StorageError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let room = self
            .rooms
            .find_one_and_update(
                doc! { "room_id": room_id },
                doc! { "$inc": { "match_counter": 1i64 } },
                options,
            )
            .await?;
        Ok(room.map(|r| r.match_counter).unwrap_or(1))
    }

    async fn set_idle_matches(&self, room_id: i64, count: u32) -> Result<(), StorageError> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.rooms
            .update_one(
                doc! { "room_id": room_id },
                doc! { "$set": { "consecutive_idle_matches": count as i64 } },
                options,
            )
            .await?;
        Ok(())
    }

    async fn set_cooldown_until(
        &self,
        room_id: i64,
        until: Option<i64>,
    ) -> Result<(), StorageError> {
        let options = UpdateOptions::builder().upsert(true).build();
        let update = match until {
            Some(ts) => doc! { "$set": { "cooldown_until": ts } },
            None => doc! { "$unset": { "cooldown_until": "" } },
        };
        self.rooms
            .update_one(doc! { "room_id": room_id }, update, options)
            .await?;
        Ok(())
    }

    async fn append_match_history(
        &self,
        room_id: i64,
        record: &MatchRecord,
    ) -> Result<(), StorageError> {
        let entry = HistoryDoc { room_id, record: record.clone() };
        self.history.insert_one(entry, None).await?;
        Ok(())
    }

    async fn get_recent_matches(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .limit(limit as i64)
            .build();
        let cursor = self.history.find(doc! { "room_id": room_id }, options).await?;
        let mut records: Vec<MatchRecord> = cursor
            .try_collect::<Vec<HistoryDoc>>()
            .await?
            .into_iter()
            .map(|d| d.record)
            .collect();
        records.reverse(); // newest last, matching the flat-file backend
        Ok(records)
    }

    async fn get_leaderboard(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<PlayerStats>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! { "score": -1 })
            .limit(limit as i64)
            .build();
        let cursor = self.players.find(doc! { "room_id": room_id }, options).await?;
        Ok(cursor
            .try_collect::<Vec<PlayerDoc>>()
            .await?
            .into_iter()
            .map(|d| d.stats)
            .collect())
    }

    async fn save_active_match(&self, game: &DiceGame) -> Result<(), StorageError> {
        let options = mongodb::options::ReplaceOptions::builder().upsert(true).build();
        let entry = ActiveMatchDoc { room_id: game.room_id, game: game.clone() };
        self.active_matches
            .replace_one(doc! { "room_id": game.room_id }, entry, options)
            .await?;
        Ok(())
    }

    async fn load_active_match(&self, room_id: i64) -> Result<Option<DiceGame>, StorageError> {
        let found = self
            .active_matches
            .find_one(doc! { "room_id": room_id }, None)
            .await?;
        Ok(found.map(|d| d.game))
    }

    async fn clear_active_match(&self, room_id: i64) -> Result<(), StorageError> {
        self.active_matches
            .delete_one(doc! { "room_id": room_id }, None)
            .await?;
        Ok(())
    }

    async fn rooms_with_active_match(&self) -> Result<Vec<i64>, StorageError> {
        let values = self.active_matches.distinct("room_id", None, None).await?;
        Ok(values.into_iter().filter_map(|v| v.as_i64()).collect())
    }
}
