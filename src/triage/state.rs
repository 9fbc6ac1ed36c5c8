//! Run state machine and the append-only conversation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::llm::{ChatMessage, Role};
use crate::triage::types::{Decision, Email};

/// State of a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageState {
    /// Waiting on the classifier.
    Classifying,
    /// Classified as ignore.
    TerminatedIgnore,
    /// Classified as notify.
    TerminatedNotify,
    /// Action agent loop running.
    Acting,
    /// Action loop finished.
    TerminatedDone,
}

impl TriageState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TriageState) -> bool {
        use TriageState::*;

        matches!(
            (self, target),
            (Classifying, TerminatedIgnore)
                | (Classifying, TerminatedNotify)
                | (Classifying, Acting)
                | (Acting, TerminatedDone)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TerminatedIgnore | Self::TerminatedNotify | Self::TerminatedDone
        )
    }

    /// State entered right after classification.
    pub fn after_classification(decision: Decision) -> Self {
        match decision {
            Decision::Ignore => Self::TerminatedIgnore,
            Decision::Notify => Self::TerminatedNotify,
            Decision::Respond => Self::Acting,
        }
    }
}

impl std::fmt::Display for TriageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Classifying => "classifying",
            Self::TerminatedIgnore => "terminated_ignore",
            Self::TerminatedNotify => "terminated_notify",
            Self::Acting => "acting",
            Self::TerminatedDone => "terminated_done",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TriageState,
    pub to: TriageState,
    pub timestamp: DateTime<Utc>,
}

/// Current state plus transition history of one run.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: TriageState,
    transitions: Vec<StateTransition>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            state: TriageState::Classifying,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> TriageState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Move to `target`, rejecting transitions the machine does not allow.
    pub fn transition_to(&mut self, target: TriageState) -> Result<(), TriageError> {
        if !self.state.can_transition_to(target) {
            return Err(TriageError::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to: target,
            timestamp: Utc::now(),
        });
        self.state = target;
        Ok(())
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation of one acting run.
///
/// Messages can only be appended. Their order is the causal record of the
/// run, so nothing here reorders or drops them.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub email_input: Email,
    pub classification_decision: Decision,
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new(email_input: Email, classification_decision: Decision) -> Self {
        Self {
            email_input,
            classification_decision,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    /// Number of tool results appended so far.
    pub fn tool_result_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }

    /// Content of the earliest tool result answering `call_id`.
    pub fn result_for(&self, call_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
            .map(|m| m.content.as_str())
    }

    /// Ids of tool calls in the latest assistant message that have no result
    /// after it.
    pub fn dangling_call_ids(&self) -> Vec<String> {
        let Some(pos) = self.messages.iter().rposition(|m| m.role == Role::Assistant) else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[pos]
            .calls()
            .iter()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    #[test]
    fn allowed_transitions() {
        use TriageState::*;
        assert!(Classifying.can_transition_to(TerminatedIgnore));
        assert!(Classifying.can_transition_to(TerminatedNotify));
        assert!(Classifying.can_transition_to(Acting));
        assert!(Acting.can_transition_to(TerminatedDone));

        assert!(!Classifying.can_transition_to(TerminatedDone));
        assert!(!TerminatedIgnore.can_transition_to(Acting));
        assert!(!TerminatedDone.can_transition_to(Acting));
        assert!(!Acting.can_transition_to(Classifying));
    }

    #[test]
    fn terminal_states() {
        assert!(TriageState::TerminatedIgnore.is_terminal());
        assert!(TriageState::TerminatedDone.is_terminal());
        assert!(!TriageState::Acting.is_terminal());
        assert!(!TriageState::Classifying.is_terminal());
    }

    #[test]
    fn tracker_records_history_and_rejects_illegal() {
        let mut tracker = RunTracker::new();
        tracker.transition_to(TriageState::Acting).unwrap();
        tracker.transition_to(TriageState::TerminatedDone).unwrap();
        assert_eq!(tracker.transitions().len(), 2);

        let err = tracker.transition_to(TriageState::Acting).unwrap_err();
        assert!(matches!(err, TriageError::InvalidTransition { .. }));
        assert_eq!(tracker.state(), TriageState::TerminatedDone);
    }

    #[test]
    fn after_classification_mapping() {
        assert_eq!(
            TriageState::after_classification(Decision::Respond),
            TriageState::Acting
        );
        assert_eq!(
            TriageState::after_classification(Decision::Ignore),
            TriageState::TerminatedIgnore
        );
    }

    #[test]
    fn dangling_calls_tracked_until_answered() {
        let email = Email::new("a@x.com", "me@x.com", "Hi", "body");
        let mut state = ConversationState::new(email, Decision::Respond);
        state.push(ChatMessage::system("sys"));
        state.push(ChatMessage::user("email"));
        state.push(ChatMessage::assistant_with_tool_calls(
            None,
            vec![
                ToolCall {
                    id: "c1".into(),
                    name: "list_latest_messages_id".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCall {
                    id: "c2".into(),
                    name: "get_gmail_message_content".into(),
                    arguments: serde_json::json!({"message_id": "m1"}),
                },
            ],
        ));
        assert_eq!(state.dangling_call_ids(), vec!["c1", "c2"]);

        state.push(ChatMessage::tool_result("c1", "list_latest_messages_id", "ids"));
        assert_eq!(state.dangling_call_ids(), vec!["c2"]);
        assert_eq!(state.result_for("c1"), Some("ids"));

        state.push(ChatMessage::tool_result("c2", "get_gmail_message_content", "body"));
        assert!(state.dangling_call_ids().is_empty());
        assert_eq!(state.tool_result_count(), 2);
        assert_eq!(state.len(), 5);
    }
}
