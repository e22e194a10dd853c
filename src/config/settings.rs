use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Which storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    File,
}

/// What to do with a match found in WAITING after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Re-arm the remaining betting window measured from `created_at`.
    Resume,
    /// Close betting immediately and proceed to the roll.
    Close,
}

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub data_file: PathBuf,
    pub bet_window: Duration,
    pub roll_delay: Duration,
    pub stop_cooldown: Duration,
    pub idle_match_limit: u32,
    pub min_bet: i64,
    pub max_bet: i64,
    pub big_multiplier: f64,
    pub small_multiplier: f64,
    pub lucky_multiplier: f64,
    pub new_user_bonus: i64,
    pub recovery_policy: RecoveryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "127.0.0.1:9001".to_string(),
            storage_backend: StorageBackend::File,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            data_file: PathBuf::from("data.json"),
            bet_window: Duration::from_secs(60),
            roll_delay: Duration::from_secs(5),
            stop_cooldown: Duration::from_secs(10),
            idle_match_limit: 3,
            min_bet: 100,
            max_bet: 1_000_000,
            big_multiplier: 2.0,
            small_multiplier: 2.0,
            lucky_multiplier: 5.0,
            new_user_bonus: 0,
            recovery_policy: RecoveryPolicy::Resume,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            storage_backend: match env::var("STORAGE_BACKEND").ok().as_deref() {
                Some("mongo") | Some("mongodb") => StorageBackend::Mongo,
                Some("file") | Some("json") | None => StorageBackend::File,
                Some(other) => {
                    warn!(backend = other, "unknown STORAGE_BACKEND, using file");
                    StorageBackend::File
                }
            },
            mongo_uri: env_or("MONGO_URI", defaults.mongo_uri),
            data_file: PathBuf::from(env_or(
                "DATA_FILE_PATH",
                defaults.data_file.display().to_string(),
            )),
            bet_window: Duration::from_secs(env_parsed("BET_TIME_SECONDS", 60u64)),
            roll_delay: Duration::from_secs(env_parsed("ROLL_DELAY_SECONDS", 5u64)),
            stop_cooldown: Duration::from_secs(env_parsed(
                "MANUAL_STOP_COOLDOWN_SECONDS",
                10u64,
            )),
            idle_match_limit: env_parsed("IDLE_GAME_LIMIT", defaults.idle_match_limit),
            min_bet: env_parsed("MIN_BET", defaults.min_bet),
            max_bet: env_parsed("MAX_BET", defaults.max_bet),
            big_multiplier: env_parsed("BIG_MULTIPLIER", defaults.big_multiplier),
            small_multiplier: env_parsed("SMALL_MULTIPLIER", defaults.small_multiplier),
            lucky_multiplier: env_parsed("LUCKY_MULTIPLIER", defaults.lucky_multiplier),
            new_user_bonus: env_parsed("NEW_USER_BONUS", defaults.new_user_bonus),
            recovery_policy: match env::var("RECOVERY_POLICY").ok().as_deref() {
                Some("close") => RecoveryPolicy::Close,
                Some("resume") | None => RecoveryPolicy::Resume,
                Some(other) => {
                    warn!(policy = other, "unknown RECOVERY_POLICY, using resume");
                    RecoveryPolicy::Resume
                }
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parsed<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = raw.as_str(), "unparseable setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_game_rules() {
        let settings = Settings::default();
        assert_eq!(settings.bet_window, Duration::from_secs(60));
        assert_eq!(settings.roll_delay, Duration::from_secs(5));
        assert_eq!(settings.stop_cooldown, Duration::from_secs(10));
        assert_eq!(settings.idle_match_limit, 3);
        assert_eq!(settings.min_bet, 100);
        assert_eq!(settings.max_bet, 1_000_000);
        assert_eq!(settings.recovery_policy, RecoveryPolicy::Resume);
    }
}
