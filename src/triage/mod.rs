//! Email triage: classifier, action agent and the loop that ties them together.

pub mod agent;
pub mod orchestrator;
pub mod poller;
pub mod prompts;
pub mod router;
pub mod state;
pub mod types;

pub use agent::{ActionAgent, AssistantTurn};
pub use orchestrator::{LogNotificationSink, NotificationSink, Orchestrator};
pub use poller::{PollReport, poll_once, spawn_inbox_poller, stop_inbox_poller};
pub use router::Classifier;
pub use state::{ConversationState, RunTracker, TriageState};
pub use types::{
    Classification, Decision, Email, Termination, TokenUsage, TriageAction, TriageOutcome,
};
