use thiserror::Error;

use crate::models::bet::BetType;

/// Failures surfaced by the storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson encode error: {0}")]
    BsonSer(#[from] mongodb::bson::ser::Error),

    #[error("bson decode error: {0}")]
    BsonDe(#[from] mongodb::bson::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Game-level error taxonomy returned to the gateway. Validation errors are
/// rejected before any state is mutated; storage errors after a debit roll
/// the debit back before surfacing.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("a match is already in progress")]
    AlreadyActive,

    #[error("cooldown active, {0} seconds remaining")]
    CooldownActive(u64),

    #[error("no match is currently running")]
    NoActiveMatch,

    #[error("betting is closed for this match")]
    MatchNotAcceptingBets,

    #[error("unknown bet category: {0}")]
    InvalidCategory(String),

    #[error("bet amount must be between {min} and {max}")]
    InvalidAmount { min: i64, max: i64 },

    #[error("insufficient funds, balance is {balance}")]
    InsufficientFunds { balance: i64 },

    #[error("a {0} bet is already placed for this match")]
    BetAlreadyPlaced(BetType),

    #[error("room worker is not running")]
    RoomClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GameError {
    /// Stable machine-readable code for the gateway protocol.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::AlreadyActive => "ALREADY_ACTIVE",
            GameError::CooldownActive(_) => "COOLDOWN_ACTIVE",
            GameError::NoActiveMatch => "NO_ACTIVE_MATCH",
            GameError::MatchNotAcceptingBets => "MATCH_NOT_ACCEPTING_BETS",
            GameError::InvalidCategory(_) => "INVALID_CATEGORY",
            GameError::InvalidAmount { .. } => "INVALID_AMOUNT",
            GameError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GameError::BetAlreadyPlaced(_) => "BET_ALREADY_PLACED",
            GameError::RoomClosed => "ROOM_CLOSED",
            GameError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
