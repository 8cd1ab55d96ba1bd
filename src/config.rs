//! Configuration types.
//!
//! Everything is read from environment variables. `from_lookup` takes the
//! variable resolver as a closure so tests never touch the real environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const PREFIX: &str = "SLOT_RELAY_";

/// Relay loop configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Source group, `@username` or numeric chat id.
    pub source_group: String,
    /// Where the watermark is persisted.
    pub state_file_path: PathBuf,
    /// Hours between heartbeat summaries.
    pub heartbeat_interval_hours: u64,
    /// Idle sleep between polling cycles.
    pub message_fetch_interval: Duration,
    /// Seconds to pause, and number of forwards between pauses.
    pub floodwait_delay: u64,
    /// Maximum messages fetched per cycle.
    pub message_fetch_limit: usize,
    /// Rate-limit retries for a single message before giving up this cycle.
    pub max_rate_limit_retries: u32,
    /// Port for the health endpoint.
    pub health_port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            source_group: String::new(),
            state_file_path: PathBuf::from("state_file.txt"),
            heartbeat_interval_hours: 4,
            message_fetch_interval: Duration::from_secs(60),
            floodwait_delay: 5,
            message_fetch_limit: 100,
            max_rate_limit_retries: 3,
            health_port: 8080,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable resolver. Unset values fall back to defaults;
    /// set but unparsable values are errors.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| env(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        let source_group = var("SOURCE_GROUP")
            .map(|v| v.trim().to_string())
            .ok_or_else(|| ConfigError::MissingEnvVar(format!("{PREFIX}SOURCE_GROUP")))?;

        let state_file_path = var("STATE_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_file_path);

        let heartbeat_interval_hours = parse_or(
            "HEARTBEAT_INTERVAL_HOURS",
            var("HEARTBEAT_INTERVAL_HOURS"),
            defaults.heartbeat_interval_hours,
        )?;
        if heartbeat_interval_hours == 0 {
            return Err(invalid("HEARTBEAT_INTERVAL_HOURS", "must be at least 1"));
        }

        let fetch_secs = parse_or(
            "MESSAGE_FETCH_INTERVAL_SECONDS",
            var("MESSAGE_FETCH_INTERVAL_SECONDS"),
            defaults.message_fetch_interval.as_secs(),
        )?;

        let floodwait_delay = parse_or(
            "FLOODWAIT_DELAY",
            var("FLOODWAIT_DELAY"),
            defaults.floodwait_delay,
        )?;

        let message_fetch_limit = parse_or(
            "MESSAGE_FETCH_LIMIT",
            var("MESSAGE_FETCH_LIMIT"),
            defaults.message_fetch_limit,
        )?;
        if message_fetch_limit == 0 {
            return Err(invalid("MESSAGE_FETCH_LIMIT", "must be at least 1"));
        }

        let max_rate_limit_retries = parse_or(
            "MAX_RATE_LIMIT_RETRIES",
            var("MAX_RATE_LIMIT_RETRIES"),
            defaults.max_rate_limit_retries,
        )?;

        let health_port = parse_or("HEALTH_PORT", var("HEALTH_PORT"), defaults.health_port)?;

        Ok(Self {
            source_group,
            state_file_path,
            heartbeat_interval_hours,
            message_fetch_interval: Duration::from_secs(fetch_secs),
            floodwait_delay,
            message_fetch_limit,
            max_rate_limit_retries,
            health_port,
        })
    }
}

/// Credentials for the messaging platform.
pub struct Secrets {
    pub bot_token: SecretString,
    /// Chat id of the private broadcast channel.
    pub broadcast_chat_id: i64,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("bot_token", &"[REDACTED]")
            .field("broadcast_chat_id", &self.broadcast_chat_id)
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            env(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let bot_token = SecretString::from(required("TELEGRAM_BOT_TOKEN")?);
        let raw_chat_id = required("TELEGRAM_BROADCAST_CHAT_ID")?;
        let broadcast_chat_id =
            raw_chat_id
                .parse::<i64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TELEGRAM_BROADCAST_CHAT_ID".into(),
                    message: format!("{raw_chat_id:?} is not an integer chat id: {e}"),
                })?;

        Ok(Self {
            bot_token,
            broadcast_chat_id,
        })
    }
}

/// Load `KEY=value` pairs from `path` into the process environment.
///
/// Variables already set in the environment win over the file.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|e| env_file_error(path, e))
}

/// Like [`load_env_file`], but a missing file is not an error.
///
/// Returns whether the file was found.
pub fn load_env_file_if_present(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(env_file_error(path, e)),
    }
}

fn env_file_error(path: &Path, e: dotenvy::Error) -> ConfigError {
    ConfigError::EnvFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &format!("{v:?}: {e}"))),
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{PREFIX}{name}"),
        message: message.to_string(),
    }
}
