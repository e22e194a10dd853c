use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GameError;

/// Bet categories. Exactly one of these wins any given dice pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetType {
    Big,   // dice sum 8..=12
    Small, // dice sum 2..=6
    Lucky, // dice sum exactly 7
}

impl BetType {
    pub const ALL: [BetType; 3] = [BetType::Big, BetType::Small, BetType::Lucky];

    /// Whether this category wins for the given dice sum.
    pub fn wins(&self, dice_sum: u8) -> bool {
        match self {
            BetType::Big => dice_sum >= 8,
            BetType::Small => dice_sum <= 6,
            BetType::Lucky => dice_sum == 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Big => "BIG",
            BetType::Small => "SMALL",
            BetType::Lucky => "LUCKY",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BetType {
    type Err = GameError;

    // Accepts the long names and the single-letter shortcuts players type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "b" | "big" => Ok(BetType::Big),
            "s" | "small" => Ok(BetType::Small),
            "l" | "lucky" => Ok(BetType::Lucky),
            _ => Err(GameError::InvalidCategory(s.to_string())),
        }
    }
}

/// A single recorded wager. One per player per match; repeated wagers on the
/// same category accumulate into `amount`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Bet {
    pub player_id: i64,
    pub username: String,
    pub bet_type: BetType,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

/// Receipt returned to the gateway after a successful placement.
#[derive(Serialize, Debug, Clone)]
pub struct BetReceipt {
    pub match_id: i64,
    pub bet_type: BetType,
    pub amount: i64,
    /// Accumulated wager for this player after the placement.
    pub total_bet: i64,
    /// Balance left after the debit.
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_names() {
        assert_eq!("BIG".parse::<BetType>().unwrap(), BetType::Big);
        assert_eq!("b".parse::<BetType>().unwrap(), BetType::Big);
        assert_eq!(" small ".parse::<BetType>().unwrap(), BetType::Small);
        assert_eq!("L".parse::<BetType>().unwrap(), BetType::Lucky);
        assert!("seven".parse::<BetType>().is_err());
    }

    #[test]
    fn win_rule_partitions_every_sum() {
        for sum in 2..=12u8 {
            let winners = BetType::ALL.iter().filter(|b| b.wins(sum)).count();
            assert_eq!(winners, 1, "sum {} must have exactly one winner", sum);
        }
    }
}
