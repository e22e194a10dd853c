use serde::Serialize;

use crate::game::ledger::BetTotals;
use crate::models::bet::BetType;

/// Events emitted by the room workers for the gateway to broadcast. The core
/// never renders user-facing text; the gateway does.
#[derive(Serialize, Debug, Clone)]
pub struct GameEvent {
    pub room_id: i64,
    #[serde(flatten)]
    pub kind: GameEventKind,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEventKind {
    MatchOpened {
        match_id: i64,
        betting_secs: u64,
    },
    BetPlaced {
        match_id: i64,
        player_id: i64,
        bet_type: BetType,
        total_bet: i64,
    },
    BettingClosed {
        match_id: i64,
        totals: BetTotals,
    },
    MatchSettled {
        match_id: i64,
        dice: (u8, u8),
        winning: BetType,
        total_payout: i64,
        winners: i64,
        losers: i64,
    },
    MatchStopped {
        match_id: i64,
        stopped_by: i64,
        total_refunded: i64,
    },
    MatchVoided {
        match_id: i64,
        total_refunded: i64,
    },
    RoomIdle {
        idle_matches: u32,
    },
}
