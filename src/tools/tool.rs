//! Tool trait and shared helpers.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub use crate::error::ToolError;

/// Per-run context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: Uuid,
    /// Mailbox id of the email being triaged, when known.
    pub email_message_id: Option<String>,
}

impl ToolContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            email_message_id: None,
        }
    }

    pub fn with_email_message_id(mut self, id: Option<String>) -> Self {
        self.email_message_id = id;
        self
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Output of a successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }

    /// Text handed back to the model: strings verbatim, anything else as JSON.
    pub fn as_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// An operation the action agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Whether running the same call twice is harmless.
    fn is_idempotent(&self) -> bool {
        true
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Required string argument.
pub fn require_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("'{key}' must be a string, got {other}"),
        }),
        None => Err(ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing required parameter '{key}'"),
        }),
    }
}

/// Optional string argument. `null` counts as absent.
pub fn optional_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    key: &str,
) -> Result<Option<&'a str>, ToolError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("'{key}' must be a string, got {other}"),
        }),
    }
}

/// Optional integer argument clamped to `min..=max`.
///
/// Models sometimes send numbers as strings, so `"5"` is accepted too.
pub fn clamped_count(
    tool: &str,
    params: &serde_json::Value,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ToolError> {
    let raw = match params.get(key) {
        None | Some(serde_json::Value::Null) => return Ok(default),
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    let value = raw.ok_or_else(|| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: format!("'{key}' must be an integer"),
    })?;
    Ok(value.clamp(min as i64, max as i64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_reports_missing_and_mistyped() {
        let params = json!({"to": 5});
        assert!(matches!(
            require_str("t", &params, "subject"),
            Err(ToolError::InvalidParameters { .. })
        ));
        let err = require_str("t", &params, "to").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn optional_str_treats_null_as_absent() {
        let params = json!({"reply_to_id": null});
        assert_eq!(optional_str("t", &params, "reply_to_id").unwrap(), None);
        let params = json!({"reply_to_id": "abc"});
        assert_eq!(optional_str("t", &params, "reply_to_id").unwrap(), Some("abc"));
    }

    #[test]
    fn clamped_count_bounds_and_defaults() {
        assert_eq!(clamped_count("t", &json!({}), "count", 5, 1, 50).unwrap(), 5);
        assert_eq!(clamped_count("t", &json!({"count": 0}), "count", 5, 1, 50).unwrap(), 1);
        assert_eq!(clamped_count("t", &json!({"count": 500}), "count", 5, 1, 50).unwrap(), 50);
        assert_eq!(clamped_count("t", &json!({"count": "7"}), "count", 5, 1, 50).unwrap(), 7);
        assert!(clamped_count("t", &json!({"count": true}), "count", 5, 1, 50).is_err());
    }

    #[test]
    fn output_text_passthrough() {
        let out = ToolOutput::text("hello", Duration::from_millis(1));
        assert_eq!(out.as_text(), "hello");
        let out = ToolOutput::success(json!({"a": 1}), Duration::from_millis(1));
        assert!(out.as_text().contains("\"a\": 1"));
    }
}
