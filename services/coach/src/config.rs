//! Application Configuration Module
//!
//! Loads settings for the terminal coach from environment variables (and a
//! `.env` file when present) into a single struct.

use coach_core::oracle::DEFAULT_MODEL;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Number of `GEMINI_API_KEY_<n>` slots read for key rotation.
const KEY_SLOTS: usize = 3;

/// Where finished sessions are saved and listed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// The web backend's session API, authenticated with the user's token.
    Remote { url: String, token: Option<String> },
    /// A local directory of JSON files.
    Local(PathBuf),
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_keys: Vec<String>,
    pub gemini_model: String,
    pub oracle_timeout: Duration,
    pub store: StoreTarget,
    /// Pace of the console speech simulation.
    pub speech_wpm: u32,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY_1`..`GEMINI_API_KEY_3`: Gemini keys used round-robin.
    //     `GEMINI_API_KEY` is accepted as a single key.
    // *   `GEMINI_MODEL`: (Optional) Defaults to "gemini-2.5-flash".
    // *   `ORACLE_TIMEOUT_SECS`: (Optional) Upper bound on one generation call. Defaults to 60.
    // *   `SESSION_STORE_URL` / `SESSION_TOKEN`: (Optional) Save sessions to the web backend.
    // *   `SESSION_DIR`: (Optional) Local session directory when no store URL is set.
    //     Defaults to "sessions".
    // *   `SPEECH_WPM`: (Optional) Console speech pace. Defaults to 150.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut gemini_api_keys: Vec<String> = (1..=KEY_SLOTS)
            .filter_map(|n| var(&format!("GEMINI_API_KEY_{n}")))
            .filter(|k| !k.trim().is_empty())
            .collect();
        if gemini_api_keys.is_empty() {
            gemini_api_keys.extend(var("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()));
        }

        let gemini_model = var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let oracle_timeout = Duration::from_secs(number(&var, "ORACLE_TIMEOUT_SECS", 60)?);
        let speech_wpm = number(&var, "SPEECH_WPM", 150)?;
        let speech_wpm = u32::try_from(speech_wpm).map_err(|_| ConfigError::InvalidNumber {
            var: "SPEECH_WPM",
            value: speech_wpm.to_string(),
        })?;

        let store = match var("SESSION_STORE_URL").filter(|u| !u.trim().is_empty()) {
            Some(url) => StoreTarget::Remote {
                url,
                token: var("SESSION_TOKEN").filter(|t| !t.trim().is_empty()),
            },
            None => StoreTarget::Local(PathBuf::from(
                var("SESSION_DIR").unwrap_or_else(|| "sessions".to_string()),
            )),
        };

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_keys,
            gemini_model,
            oracle_timeout,
            store,
            speech_wpm,
            log_level,
        })
    }
}

fn number(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidNumber { var: name, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert!(config.gemini_api_keys.is_empty());
        assert_eq!(config.gemini_model, "gemini-2.5-flash");
        assert_eq!(config.oracle_timeout, Duration::from_secs(60));
        assert_eq!(config.speech_wpm, 150);
        assert_eq!(config.store, StoreTarget::Local(PathBuf::from("sessions")));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn numbered_keys_take_precedence() {
        let config = load(&[
            ("GEMINI_API_KEY", "single"),
            ("GEMINI_API_KEY_1", "k1"),
            ("GEMINI_API_KEY_3", "k3"),
        ])
        .unwrap();
        assert_eq!(config.gemini_api_keys, vec!["k1", "k3"]);

        let config = load(&[("GEMINI_API_KEY", "single")]).unwrap();
        assert_eq!(config.gemini_api_keys, vec!["single"]);
    }

    #[test]
    fn remote_store_is_chosen_by_url() {
        let config = load(&[
            ("SESSION_STORE_URL", "https://coach.example.com"),
            ("SESSION_TOKEN", "jwt"),
        ])
        .unwrap();
        assert_eq!(
            config.store,
            StoreTarget::Remote {
                url: "https://coach.example.com".into(),
                token: Some("jwt".into())
            }
        );
    }

    #[test]
    fn bad_values_are_reported() {
        assert_eq!(
            load(&[("ORACLE_TIMEOUT_SECS", "soon")]).unwrap_err(),
            ConfigError::InvalidNumber {
                var: "ORACLE_TIMEOUT_SECS",
                value: "soon".into()
            }
        );
        assert_eq!(
            load(&[("SPEECH_WPM", "5000000000")]).unwrap_err(),
            ConfigError::InvalidNumber {
                var: "SPEECH_WPM",
                value: "5000000000".into()
            }
        );
        assert_eq!(
            load(&[("RUST_LOG", "chatty")]).unwrap_err(),
            ConfigError::InvalidLogLevel("chatty".into())
        );
    }
}
