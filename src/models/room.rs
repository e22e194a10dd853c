use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::bet::BetType;
use crate::models::game::SettledMatch;

/// Persistent per-room counters. `match_counter` is monotonic and never
/// reset; `cooldown_until` is a unix timestamp so a manual-stop cooldown
/// survives a restart.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RoomMeta {
    pub match_counter: i64,
    pub consecutive_idle_matches: u32,
    pub cooldown_until: Option<i64>,
}

/// One entry of the room's match history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MatchRecord {
    pub match_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Absent for a voided match: no dice were ever drawn.
    pub dice: Option<(u8, u8)>,
    pub winning_type: Option<BetType>,
    pub total_staked: i64,
    pub total_payout: i64,
    pub winners: i64,
    pub losers: i64,
    pub voided: bool,
}

impl MatchRecord {
    pub fn settled(settled: &SettledMatch) -> Self {
        MatchRecord {
            match_id: settled.match_id,
            timestamp: Utc::now(),
            dice: Some(settled.dice),
            winning_type: Some(settled.winning),
            total_staked: settled.total_staked,
            total_payout: settled.total_payout,
            winners: settled.winners,
            losers: settled.losers,
            voided: false,
        }
    }

    pub fn voided(match_id: i64, total_refunded: i64) -> Self {
        MatchRecord {
            match_id,
            timestamp: Utc::now(),
            dice: None,
            winning_type: None,
            total_staked: total_refunded,
            total_payout: 0,
            winners: 0,
            losers: 0,
            voided: true,
        }
    }
}

/// One refunded wager after a manual stop or a voided match.
#[derive(Serialize, Debug, Clone)]
pub struct RefundEntry {
    pub player_id: i64,
    pub username: String,
    pub amount: i64,
}

/// Result of an operator stop: every placed bet returned in full.
#[derive(Serialize, Debug, Clone)]
pub struct RefundSummary {
    pub match_id: i64,
    pub stopped_by: i64,
    pub refunds: Vec<RefundEntry>,
    pub total_refunded: i64,
    pub cooldown_secs: u64,
}
