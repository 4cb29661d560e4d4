//! Session configuration.
//!
//! The UI layer hands the orchestrator a loosely filled [`SessionSetup`]
//! (whatever the setup screen collected). It only becomes a
//! [`SessionConfiguration`] once every field is present, which is the
//! precondition for leaving the `LoadingConfig` phase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Language the interviewer speaks and listens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpokenLanguage {
    English,
    Hindi,
}

impl SpokenLanguage {
    /// BCP-47 locale used for both synthesis and recognition.
    pub fn locale(self) -> &'static str {
        match self {
            SpokenLanguage::English => "en-US",
            SpokenLanguage::Hindi => "hi-IN",
        }
    }
}

impl fmt::Display for SpokenLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpokenLanguage::English => f.write_str("English"),
            SpokenLanguage::Hindi => f.write_str("Hindi"),
        }
    }
}

impl FromStr for SpokenLanguage {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" | "en-us" => Ok(SpokenLanguage::English),
            "hindi" | "hi" | "hi-in" => Ok(SpokenLanguage::Hindi),
            other => Err(SetupError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Which flow the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Problem, then the candidate's own code, then the interview.
    Interview,
    /// Problem with a reference solution and explanation, then the interview
    /// on that solution.
    Learning,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Interview => f.write_str("interview"),
            SessionMode::Learning => f.write_str("learning"),
        }
    }
}

/// Raw values collected by the setup screen. Any field may be absent.
#[derive(Debug, Clone, Default)]
pub struct SessionSetup {
    pub code_language: Option<String>,
    pub difficulty: Option<String>,
    pub spoken_language: Option<String>,
}

/// Validated, read-only configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    #[serde(rename = "programmingLanguage")]
    pub code_language: String,
    pub difficulty: String,
    #[serde(rename = "interviewLanguage")]
    pub spoken_language: SpokenLanguage,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("Missing session setting: {0}")]
    Missing(&'static str),
    #[error("Unsupported spoken language: {0}")]
    UnsupportedLanguage(String),
}

fn required(value: Option<String>, name: &'static str) -> Result<String, SetupError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(SetupError::Missing(name)),
    }
}

impl TryFrom<SessionSetup> for SessionConfiguration {
    type Error = SetupError;

    fn try_from(setup: SessionSetup) -> Result<Self, Self::Error> {
        let code_language = required(setup.code_language, "code language")?;
        let difficulty = required(setup.difficulty, "difficulty")?;
        let spoken_language = required(setup.spoken_language, "spoken language")?.parse()?;
        Ok(Self {
            code_language,
            difficulty,
            spoken_language,
        })
    }
}

/// Fixed delays used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Between code submission and the first question.
    pub startup_delay: Duration,
    /// Between a candidate answer and the next question request.
    pub settle_delay: Duration,
    /// Caption hold after an utterance finishes.
    pub speech_grace: Duration,
    /// Caption hold after recognition ends.
    pub recognition_grace: Duration,
    /// How long an inactive caption stays on screen.
    pub caption_decay: Duration,
    /// How long feedback is shown before results navigation.
    pub feedback_display: Duration,
    /// Upper bound on any single oracle call.
    pub oracle_timeout: Duration,
}

impl SessionTimings {
    pub fn for_mode(mode: SessionMode) -> Self {
        match mode {
            SessionMode::Interview => Self {
                startup_delay: Duration::from_millis(1000),
                settle_delay: Duration::from_millis(2000),
                speech_grace: Duration::from_millis(500),
                recognition_grace: Duration::from_millis(1500),
                caption_decay: Duration::from_millis(3000),
                feedback_display: Duration::from_millis(3000),
                oracle_timeout: Duration::from_secs(60),
            },
            SessionMode::Learning => Self {
                startup_delay: Duration::ZERO,
                settle_delay: Duration::from_millis(800),
                speech_grace: Duration::from_millis(300),
                recognition_grace: Duration::from_millis(1200),
                caption_decay: Duration::from_millis(3000),
                feedback_display: Duration::from_millis(1200),
                oracle_timeout: Duration::from_secs(60),
            },
        }
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(lang: Option<&str>, diff: Option<&str>, spoken: Option<&str>) -> SessionSetup {
        SessionSetup {
            code_language: lang.map(str::to_string),
            difficulty: diff.map(str::to_string),
            spoken_language: spoken.map(str::to_string),
        }
    }

    #[test]
    fn complete_setup_becomes_configuration() {
        let config =
            SessionConfiguration::try_from(setup(Some("Python"), Some("Easy"), Some("Hindi")))
                .unwrap();
        assert_eq!(config.code_language, "Python");
        assert_eq!(config.difficulty, "Easy");
        assert_eq!(config.spoken_language, SpokenLanguage::Hindi);
        assert_eq!(config.spoken_language.locale(), "hi-IN");
    }

    #[test]
    fn blank_or_missing_fields_are_rejected() {
        assert_eq!(
            SessionConfiguration::try_from(setup(None, Some("Easy"), Some("English"))),
            Err(SetupError::Missing("code language"))
        );
        assert_eq!(
            SessionConfiguration::try_from(setup(Some("Rust"), Some("  "), Some("English"))),
            Err(SetupError::Missing("difficulty"))
        );
        assert_eq!(
            SessionConfiguration::try_from(setup(Some("Rust"), Some("Hard"), None)),
            Err(SetupError::Missing("spoken language"))
        );
    }

    #[test]
    fn unknown_spoken_language_is_rejected() {
        let result =
            SessionConfiguration::try_from(setup(Some("Go"), Some("Hard"), Some("Klingon")));
        assert_eq!(
            result,
            Err(SetupError::UnsupportedLanguage("klingon".to_string()))
        );
    }

    #[test]
    fn configuration_uses_store_field_names() {
        let config = SessionConfiguration {
            code_language: "Java".into(),
            difficulty: "Medium".into(),
            spoken_language: SpokenLanguage::English,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["programmingLanguage"], "Java");
        assert_eq!(json["interviewLanguage"], "English");
    }
}
