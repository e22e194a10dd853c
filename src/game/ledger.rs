use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::game::payout::PayoutTable;
use crate::models::bet::{Bet, BetType};

/// Wager sums per category, used in status snapshots and announcements.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct BetTotals {
    pub big: i64,
    pub small: i64,
    pub lucky: i64,
}

impl BetTotals {
    pub fn total(&self) -> i64 {
        self.big + self.small + self.lucky
    }
}

/// Outcome of one wager after the dice resolved.
#[derive(Serialize, Debug, Clone)]
pub struct Settlement {
    pub player_id: i64,
    pub username: String,
    pub bet_type: BetType,
    pub stake: i64,
    /// Credited winnings; zero for losers, whose stake is already gone.
    pub winnings: i64,
    pub is_win: bool,
}

/// The wagers belonging to one match. At most one entry per player; a repeat
/// wager on the same category accumulates, a different category is rejected.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BetLedger {
    bets: Vec<Bet>,
}

impl BetLedger {
    pub fn new() -> Self {
        BetLedger::default()
    }

    /// Rejects a wager that would give the player a second category.
    pub fn check(&self, player_id: i64, bet_type: BetType) -> Result<(), GameError> {
        match self.bets.iter().find(|b| b.player_id == player_id) {
            Some(existing) if existing.bet_type != bet_type => {
                Err(GameError::BetAlreadyPlaced(existing.bet_type))
            }
            _ => Ok(()),
        }
    }

    /// Records a wager that already passed `check`. Returns the player's
    /// accumulated wager after recording.
    pub fn record(&mut self, bet: Bet) -> i64 {
        if let Some(existing) = self.bets.iter_mut().find(|b| b.player_id == bet.player_id) {
            existing.amount += bet.amount;
            existing.placed_at = bet.placed_at;
            if !bet.username.is_empty() {
                existing.username = bet.username;
            }
            existing.amount
        } else {
            let amount = bet.amount;
            self.bets.push(bet);
            amount
        }
    }

    /// Undoes the most recent accumulation for a player, used when the debit
    /// could not be matched by a recorded wager.
    pub fn rollback(&mut self, player_id: i64, amount: i64) {
        if let Some(pos) = self.bets.iter().position(|b| b.player_id == player_id) {
            self.bets[pos].amount -= amount;
            if self.bets[pos].amount <= 0 {
                self.bets.remove(pos);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    pub fn participants(&self) -> usize {
        self.bets.len()
    }

    pub fn totals(&self) -> BetTotals {
        let mut totals = BetTotals::default();
        for bet in &self.bets {
            match bet.bet_type {
                BetType::Big => totals.big += bet.amount,
                BetType::Small => totals.small += bet.amount,
                BetType::Lucky => totals.lucky += bet.amount,
            }
        }
        totals
    }

    pub fn total_staked(&self) -> i64 {
        self.bets.iter().map(|b| b.amount).sum()
    }

    /// Computes settlement deltas for every recorded wager. Consumes the
    /// ledger: a settled ledger cannot be settled again.
    pub fn settle(self, winning: BetType, table: &PayoutTable) -> Vec<Settlement> {
        self.bets
            .into_iter()
            .map(|bet| {
                let is_win = bet.bet_type == winning;
                let winnings = if is_win { table.payout(bet.amount, winning) } else { 0 };
                Settlement {
                    player_id: bet.player_id,
                    username: bet.username,
                    bet_type: bet.bet_type,
                    stake: bet.amount,
                    winnings,
                    is_win,
                }
            })
            .collect()
    }

    /// Consumes the ledger for a full refund (manual stop or voided match).
    pub fn into_bets(self) -> Vec<Bet> {
        self.bets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;
    use chrono::Utc;

    fn bet(player_id: i64, bet_type: BetType, amount: i64) -> Bet {
        Bet {
            player_id,
            username: format!("player{}", player_id),
            bet_type,
            amount,
            placed_at: Utc::now(),
        }
    }

    fn table() -> PayoutTable {
        PayoutTable::from_settings(&Settings::default()).unwrap()
    }

    #[test]
    fn same_category_accumulates() {
        let mut ledger = BetLedger::new();
        ledger.check(1, BetType::Big).unwrap();
        assert_eq!(ledger.record(bet(1, BetType::Big, 100)), 100);
        ledger.check(1, BetType::Big).unwrap();
        assert_eq!(ledger.record(bet(1, BetType::Big, 250)), 350);
        assert_eq!(ledger.participants(), 1);
        assert_eq!(ledger.totals().big, 350);
    }

    #[test]
    fn different_category_is_rejected() {
        let mut ledger = BetLedger::new();
        ledger.record(bet(1, BetType::Small, 100));
        match ledger.check(1, BetType::Lucky) {
            Err(GameError::BetAlreadyPlaced(BetType::Small)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        // the rejected wager never touched the ledger
        assert_eq!(ledger.total_staked(), 100);
    }

    #[test]
    fn rollback_undoes_an_accumulation() {
        let mut ledger = BetLedger::new();
        ledger.record(bet(1, BetType::Big, 100));
        ledger.record(bet(1, BetType::Big, 50));
        ledger.rollback(1, 50);
        assert_eq!(ledger.totals().big, 100);
        ledger.rollback(1, 100);
        assert!(ledger.is_empty());
    }

    #[test]
    fn settle_credits_only_the_winning_category() {
        let mut ledger = BetLedger::new();
        ledger.record(bet(1, BetType::Big, 100));
        ledger.record(bet(2, BetType::Small, 200));
        ledger.record(bet(3, BetType::Lucky, 300));
        let table = table();

        let settlements = ledger.settle(BetType::Big, &table);
        assert_eq!(settlements.len(), 3);
        for s in &settlements {
            if s.player_id == 1 {
                assert!(s.is_win);
                assert_eq!(s.winnings, table.payout(100, BetType::Big));
            } else {
                assert!(!s.is_win);
                assert_eq!(s.winnings, 0);
            }
        }
    }

    #[test]
    fn totals_sum_per_category() {
        let mut ledger = BetLedger::new();
        ledger.record(bet(1, BetType::Big, 100));
        ledger.record(bet(2, BetType::Big, 150));
        ledger.record(bet(3, BetType::Small, 50));
        let totals = ledger.totals();
        assert_eq!(totals, BetTotals { big: 250, small: 50, lucky: 0 });
        assert_eq!(totals.total(), 300);
        assert_eq!(ledger.total_staked(), 300);
    }
}
