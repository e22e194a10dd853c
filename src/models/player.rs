use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-room player record kept by the storage backends.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlayerStats {
    pub user_id: i64,
    pub username: String,
    pub score: i64,
    pub total_wins: i64,
    pub total_losses: i64,
    pub total_bets: i64,
    pub last_active: DateTime<Utc>,
}

impl PlayerStats {
    pub fn new(user_id: i64, username: &str, starting_score: i64) -> Self {
        PlayerStats {
            user_id,
            username: username.to_string(),
            score: starting_score,
            total_wins: 0,
            total_losses: 0,
            total_bets: 0,
            last_active: Utc::now(),
        }
    }
}
