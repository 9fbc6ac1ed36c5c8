//! Configuration types.

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::triage::prompts::PromptContext;

/// Triage loop configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Agent turns allowed per email before the run is cut off.
    pub max_turns: usize,
    /// Times the harness re-asks when the model answers without acting.
    pub max_tool_nudges: usize,
    /// Emails triaged concurrently by the batch helper.
    pub max_concurrent_triages: usize,
    /// Background, triage rules and reply preferences fed to the prompts.
    pub prompts: PromptContext,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_tool_nudges: 1,
            max_concurrent_triages: 4,
            prompts: PromptContext::default(),
        }
    }
}

impl TriageConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// Prompt text can be overridden with files named by
    /// `TRIAGE_BACKGROUND_FILE`, `TRIAGE_RULES_FILE`, `TRIAGE_PREFERENCES_FILE`
    /// and `TRIAGE_CALENDAR_FILE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut prompts = defaults.prompts;

        if let Some(text) = read_optional_file("TRIAGE_BACKGROUND_FILE")? {
            prompts.background = text;
        }
        if let Some(text) = read_optional_file("TRIAGE_RULES_FILE")? {
            prompts.triage_instructions = text;
        }
        if let Some(text) = read_optional_file("TRIAGE_PREFERENCES_FILE")? {
            prompts.response_preferences = text;
        }
        if let Some(text) = read_optional_file("TRIAGE_CALENDAR_FILE")? {
            prompts.cal_preferences = text;
        }

        Self {
            max_turns: parse_env("TRIAGE_MAX_TURNS", defaults.max_turns)?,
            max_tool_nudges: parse_env("TRIAGE_MAX_TOOL_NUDGES", defaults.max_tool_nudges)?,
            max_concurrent_triages: parse_env(
                "TRIAGE_MAX_CONCURRENT",
                defaults.max_concurrent_triages,
            )?
            .max(1),
            prompts,
        }
        .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_MAX_TURNS".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(self)
    }
}

/// Inbox polling configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Max unread emails fetched per tick.
    pub batch_size: usize,
    /// How long shutdown waits for in-flight triages before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 10,
            shutdown_grace: Duration::from_secs(120),
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = parse_env("TRIAGE_POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())?;
        Ok(Self {
            poll_interval: Duration::from_secs(secs.max(1)),
            batch_size: parse_env("TRIAGE_POLL_BATCH", defaults.batch_size)?.clamp(1, 50),
            shutdown_grace: Duration::from_secs(parse_env(
                "TRIAGE_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a valid value"),
            })
        }
        _ => Ok(default),
    }
}

fn read_optional_file(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(path) if !path.trim().is_empty() => read_prompt_file(Path::new(path.trim())).map(Some),
        _ => Ok(None),
    }
}

/// Read a prompt override file; blank files are rejected.
pub fn read_prompt_file(path: &Path) -> Result<String, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: path.display().to_string(),
            message: "prompt file is empty".into(),
        });
    }
    Ok(trimmed.to_string())
}
