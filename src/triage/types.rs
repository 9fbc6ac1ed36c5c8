//! Types shared across the triage loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TriageError;
use crate::llm::ChatMessage;

/// An incoming email. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub author: String,
    pub to: String,
    pub subject: String,
    pub body_text: String,
    /// Mailbox id, used as `reply_to_id` when answering.
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl Email {
    pub fn new(
        author: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            to: to.into(),
            subject: subject.into(),
            body_text: body_text.into(),
            message_id: None,
            thread_id: None,
            received_at: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Author and subject must be non-empty; the body may be empty.
    pub fn validate(&self) -> Result<(), TriageError> {
        if self.author.trim().is_empty() {
            return Err(TriageError::InvalidEmail("author is empty".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(TriageError::InvalidEmail("subject is empty".into()));
        }
        Ok(())
    }
}

/// The triage decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Ignore,
    Respond,
    Notify,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "respond" => Ok(Self::Respond),
            "notify" => Ok(Self::Notify),
            other => Err(format!(
                "unknown classification '{other}' (expected ignore, respond or notify)"
            )),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ignore => "ignore",
            Self::Respond => "respond",
            Self::Notify => "notify",
        };
        write!(f, "{s}")
    }
}

/// Classifier output: one per email, never revised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub decision: Decision,
    pub reasoning: String,
}

/// Token counts for one or more model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens: u64::from(input_tokens),
            output_tokens: u64::from(output_tokens),
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Why an acting run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The model produced a turn with no tool calls.
    Completed,
    /// The model called the `done` tool.
    DoneTool,
    /// `max_turns` turns were spent while the model kept calling tools.
    BudgetExhausted { turns: usize },
    /// The action model failed; progress up to that point is kept.
    AgentFailed { reason: String },
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::DoneTool => write!(f, "done_tool"),
            Self::BudgetExhausted { turns } => write!(f, "budget_exhausted after {turns} turns"),
            Self::AgentFailed { reason } => write!(f, "agent_failed: {reason}"),
        }
    }
}

/// What happened to one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageAction {
    Ignored,
    Notified,
    Acted {
        termination: Termination,
        turns: usize,
        tool_calls: usize,
        /// Text of the final assistant turn, if it had any.
        final_message: Option<String>,
    },
}

/// Result of a full triage run.
#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub run_id: Uuid,
    pub email: Email,
    pub classification: Classification,
    pub action: TriageAction,
    /// Full conversation of the acting phase; empty for ignore/notify.
    pub messages: Vec<ChatMessage>,
    pub usage: TokenUsage,
    pub estimated_cost: Decimal,
}

impl TriageOutcome {
    pub fn decision(&self) -> Decision {
        self.classification.decision
    }

    pub fn termination(&self) -> Option<&Termination> {
        match &self.action {
            TriageAction::Acted { termination, .. } => Some(termination),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(Email::new("a@x.com", "me@x.com", "Hi", "").validate().is_ok());
        assert!(matches!(
            Email::new("", "me@x.com", "Hi", "body").validate(),
            Err(TriageError::InvalidEmail(_))
        ));
        assert!(matches!(
            Email::new("a@x.com", "me@x.com", "  ", "body").validate(),
            Err(TriageError::InvalidEmail(_))
        ));
    }

    #[test]
    fn decision_parse_and_display() {
        assert_eq!("Respond".parse::<Decision>().unwrap(), Decision::Respond);
        assert_eq!(Decision::Notify.to_string(), "notify");
        assert!("archive".parse::<Decision>().is_err());
    }

    #[test]
    fn decision_serde_lowercase() {
        let d: Decision = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(d, Decision::Ignore);
        assert_eq!(serde_json::to_string(&Decision::Respond).unwrap(), "\"respond\"");
    }

    #[test]
    fn usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(TokenUsage::new(100, 20));
        usage.add(TokenUsage::new(50, 5));
        assert_eq!(usage.input_tokens, 150);
        assert_eq!(usage.total(), 175);
    }
}
