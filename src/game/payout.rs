use thiserror::Error;

use crate::config::settings::Settings;
use crate::models::bet::BetType;

/// Multipliers are carried as per-mille integers so payouts stay in pure
/// integer arithmetic: points have no fractional part.
const MILLE: i64 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum PayoutError {
    #[error("multiplier for {0} must be a non-negative finite number")]
    InvalidMultiplier(BetType),

    #[error("dice pair ({0},{1}) satisfies {2} categories, expected exactly 1")]
    NotPartitioned(u8, u8, usize),
}

/// Static payout configuration: category multipliers plus the rule mapping a
/// dice pair to its winning category. Never mutated after startup.
#[derive(Debug, Clone)]
pub struct PayoutTable {
    big_mille: i64,
    small_mille: i64,
    lucky_mille: i64,
}

impl PayoutTable {
    /// Builds the table from configured multipliers and validates that the
    /// win rule partitions all 36 dice pairs. Called once at startup.
    pub fn from_settings(settings: &Settings) -> Result<Self, PayoutError> {
        let table = PayoutTable {
            big_mille: to_mille(settings.big_multiplier, BetType::Big)?,
            small_mille: to_mille(settings.small_multiplier, BetType::Small)?,
            lucky_mille: to_mille(settings.lucky_multiplier, BetType::Lucky)?,
        };
        table.validate()?;
        Ok(table)
    }

    /// Checks the completeness/exclusivity invariant: every one of the 36
    /// dice pairs maps to exactly one category.
    fn validate(&self) -> Result<(), PayoutError> {
        for d1 in 1..=6u8 {
            for d2 in 1..=6u8 {
                let matching = BetType::ALL.iter().filter(|b| b.wins(d1 + d2)).count();
                if matching != 1 {
                    return Err(PayoutError::NotPartitioned(d1, d2, matching));
                }
            }
        }
        Ok(())
    }

    /// Resolves a dice pair to its winning category. Total and deterministic
    /// over all pairs; exclusivity is guaranteed by `validate`.
    pub fn resolve(&self, dice: (u8, u8)) -> BetType {
        let sum = dice.0 + dice.1;
        if sum <= 6 {
            BetType::Small
        } else if sum >= 8 {
            BetType::Big
        } else {
            BetType::Lucky
        }
    }

    pub fn multiplier_mille(&self, bet_type: BetType) -> i64 {
        match bet_type {
            BetType::Big => self.big_mille,
            BetType::Small => self.small_mille,
            BetType::Lucky => self.lucky_mille,
        }
    }

    /// Human-readable multiplier for announcements, e.g. `2.5`.
    pub fn multiplier(&self, bet_type: BetType) -> f64 {
        self.multiplier_mille(bet_type) as f64 / MILLE as f64
    }

    /// Winnings credited for a winning stake. Integer truncation toward
    /// zero; the stake itself was already debited at placement.
    pub fn payout(&self, amount: i64, bet_type: BetType) -> i64 {
        amount.saturating_mul(self.multiplier_mille(bet_type)) / MILLE
    }
}

fn to_mille(multiplier: f64, bet_type: BetType) -> Result<i64, PayoutError> {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return Err(PayoutError::InvalidMultiplier(bet_type));
    }
    Ok((multiplier * MILLE as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PayoutTable {
        PayoutTable::from_settings(&Settings::default()).unwrap()
    }

    #[test]
    fn every_dice_pair_resolves_to_exactly_one_category() {
        let table = table();
        for d1 in 1..=6u8 {
            for d2 in 1..=6u8 {
                let winning = table.resolve((d1, d2));
                let matching: Vec<_> =
                    BetType::ALL.iter().filter(|b| b.wins(d1 + d2)).collect();
                assert_eq!(matching.len(), 1);
                assert_eq!(*matching[0], winning);
            }
        }
    }

    #[test]
    fn resolve_follows_sum_thresholds() {
        let table = table();
        assert_eq!(table.resolve((1, 1)), BetType::Small);
        assert_eq!(table.resolve((3, 3)), BetType::Small);
        assert_eq!(table.resolve((3, 4)), BetType::Lucky);
        assert_eq!(table.resolve((4, 4)), BetType::Big);
        assert_eq!(table.resolve((6, 6)), BetType::Big);
    }

    #[test]
    fn payout_truncates_toward_zero() {
        let mut settings = Settings::default();
        settings.big_multiplier = 2.0;
        settings.lucky_multiplier = 1.5;
        let table = PayoutTable::from_settings(&settings).unwrap();
        assert_eq!(table.payout(101, BetType::Big), 202);
        assert_eq!(table.payout(101, BetType::Lucky), 151);
        assert_eq!(table.payout(1, BetType::Lucky), 1);
        assert_eq!(table.payout(0, BetType::Big), 0);
    }

    #[test]
    fn payout_is_bounded_by_max_multiplier() {
        let table = table();
        let max_mille = BetType::ALL
            .iter()
            .map(|b| table.multiplier_mille(*b))
            .max()
            .unwrap();
        for amount in [1i64, 99, 100, 101, 1_000_000] {
            for bet_type in BetType::ALL {
                let won = table.payout(amount, bet_type);
                assert!(won >= 0);
                assert!(won <= amount * max_mille / 1000);
            }
        }
    }

    #[test]
    fn negative_multiplier_is_rejected() {
        let mut settings = Settings::default();
        settings.small_multiplier = -1.0;
        assert_eq!(
            PayoutTable::from_settings(&settings).unwrap_err(),
            PayoutError::InvalidMultiplier(BetType::Small)
        );
    }
}
