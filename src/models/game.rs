use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::game::ledger::{BetLedger, BetTotals, Settlement};
use crate::game::payout::PayoutTable;
use crate::models::bet::BetType;

/// Match lifecycle states. WAITING accepts bets, CLOSED waits for the roll,
/// OVER is terminal for the match id.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameState {
    Waiting,
    Closed,
    Over,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match *self {
            GameState::Waiting => "WAITING",
            GameState::Closed => "CLOSED",
            GameState::Over => "OVER",
        };
        write!(f, "{}", state)
    }
}

/// One match in one room. Created in WAITING; settlement consumes the value,
/// so a match that reached OVER cannot be settled twice by construction.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiceGame {
    pub match_id: i64,
    pub room_id: i64,
    pub state: GameState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub dice: Option<(u8, u8)>,
    pub bets: BetLedger,
}

impl DiceGame {
    pub fn new(match_id: i64, room_id: i64) -> Self {
        DiceGame {
            match_id,
            room_id,
            state: GameState::Waiting,
            created_at: Utc::now(),
            closed_at: None,
            dice: None,
            bets: BetLedger::new(),
        }
    }

    /// WAITING → CLOSED. Any other starting state is rejected.
    pub fn close(&mut self) -> Result<(), GameError> {
        if self.state != GameState::Waiting {
            return Err(GameError::MatchNotAcceptingBets);
        }
        self.state = GameState::Closed;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Records the drawn dice while CLOSED, ahead of settlement, so a crash
    /// between draw and settlement stays recoverable.
    pub fn record_dice(&mut self, dice: (u8, u8)) {
        debug_assert_eq!(self.state, GameState::Closed);
        self.dice = Some(dice);
    }

    /// CLOSED → OVER. Consumes the match: the only route to OVER, and it can
    /// be taken exactly once per match value.
    pub fn settle(mut self, dice: (u8, u8), table: &PayoutTable) -> SettledMatch {
        debug_assert_eq!(self.state, GameState::Closed);
        self.state = GameState::Over;
        let winning = table.resolve(dice);
        let total_staked = self.bets.total_staked();
        let settlements = self.bets.settle(winning, table);
        let winners = settlements.iter().filter(|s| s.is_win).count() as i64;
        let losers = settlements.len() as i64 - winners;
        let total_payout = settlements.iter().map(|s| s.winnings).sum();
        SettledMatch {
            match_id: self.match_id,
            room_id: self.room_id,
            dice,
            winning,
            settlements,
            total_staked,
            total_payout,
            winners,
            losers,
        }
    }

    pub fn snapshot(&self, time_remaining_secs: Option<u64>) -> MatchSnapshot {
        let totals = self.bets.totals();
        MatchSnapshot {
            match_id: self.match_id,
            room_id: self.room_id,
            state: self.state,
            created_at: self.created_at,
            participants: self.bets.participants(),
            totals,
            dice: self.dice,
            time_remaining_secs,
        }
    }
}

/// The immutable outcome of a settled match.
#[derive(Serialize, Debug, Clone)]
pub struct SettledMatch {
    pub match_id: i64,
    pub room_id: i64,
    pub dice: (u8, u8),
    pub winning: BetType,
    pub settlements: Vec<Settlement>,
    pub total_staked: i64,
    pub total_payout: i64,
    pub winners: i64,
    pub losers: i64,
}

/// Read-only view of the live match handed to the gateway.
#[derive(Serialize, Debug, Clone)]
pub struct MatchSnapshot {
    pub match_id: i64,
    pub room_id: i64,
    pub state: GameState,
    pub created_at: DateTime<Utc>,
    pub participants: usize,
    pub totals: BetTotals,
    pub dice: Option<(u8, u8)>,
    pub time_remaining_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;
    use crate::models::bet::Bet;

    fn table() -> PayoutTable {
        PayoutTable::from_settings(&Settings::default()).unwrap()
    }

    #[test]
    fn close_is_only_valid_from_waiting() {
        let mut game = DiceGame::new(1, 42);
        game.close().unwrap();
        assert_eq!(game.state, GameState::Closed);
        assert!(game.closed_at.is_some());
        assert!(matches!(game.close(), Err(GameError::MatchNotAcceptingBets)));
    }

    #[test]
    fn settle_pays_winners_and_reports_totals() {
        let mut game = DiceGame::new(7, 42);
        game.bets.record(Bet {
            player_id: 1,
            username: "alice".into(),
            bet_type: BetType::Big,
            amount: 100,
            placed_at: Utc::now(),
        });
        game.bets.record(Bet {
            player_id: 2,
            username: "bob".into(),
            bet_type: BetType::Small,
            amount: 60,
            placed_at: Utc::now(),
        });
        game.close().unwrap();

        let settled = game.settle((6, 5), &table());
        assert_eq!(settled.winning, BetType::Big);
        assert_eq!(settled.winners, 1);
        assert_eq!(settled.losers, 1);
        assert_eq!(settled.total_staked, 160);
        assert_eq!(settled.total_payout, table().payout(100, BetType::Big));
        // losing stakes are not credited back
        let bob = settled.settlements.iter().find(|s| s.player_id == 2).unwrap();
        assert_eq!(bob.winnings, 0);
    }

    #[test]
    fn snapshot_reflects_ledger_totals() {
        let mut game = DiceGame::new(3, 9);
        game.bets.record(Bet {
            player_id: 5,
            username: "eve".into(),
            bet_type: BetType::Lucky,
            amount: 40,
            placed_at: Utc::now(),
        });
        let snapshot = game.snapshot(Some(30));
        assert_eq!(snapshot.match_id, 3);
        assert_eq!(snapshot.state, GameState::Waiting);
        assert_eq!(snapshot.participants, 1);
        assert_eq!(snapshot.totals.lucky, 40);
        assert_eq!(snapshot.time_remaining_secs, Some(30));
    }
}
