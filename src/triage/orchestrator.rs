//! Triage loop: classify an email, then let the action agent work through
//! tools until it stops, calls `done`, or runs out of turns.
//!
//! ```text
//! Classifying ──ignore──▶ TerminatedIgnore
//!      │ ────notify──▶ TerminatedNotify
//!      └──respond──▶ Acting ──▶ TerminatedDone
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::TriageConfig;
use crate::error::{ToolError, TriageError};
use crate::llm::{ChatMessage, LlmProvider, ToolCall, costs};
use crate::tools::builtin::DONE_TOOL_NAME;
use crate::tools::{ToolContext, ToolRegistry};
use crate::triage::agent::ActionAgent;
use crate::triage::prompts::{self, PromptContext};
use crate::triage::router::Classifier;
use crate::triage::state::{ConversationState, RunTracker, TriageState};
use crate::triage::types::{
    Classification, Decision, Email, Termination, TokenUsage, TriageAction, TriageOutcome,
};

/// Receives emails classified as notify.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, email: &Email, classification: &Classification);
}

/// Default sink: one structured log line per notification.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, email: &Email, classification: &Classification) {
        tracing::info!(
            from = %email.author,
            subject = %email.subject,
            reasoning = %classification.reasoning,
            "Notify: email needs attention but no reply"
        );
    }
}

/// Result of one acting phase.
struct ActingResult {
    termination: Termination,
    turns: usize,
    tool_calls: usize,
    final_message: Option<String>,
    usage: TokenUsage,
    messages: Vec<ChatMessage>,
}

/// Runs triage for one email at a time; independent runs may share it.
pub struct Orchestrator {
    classifier: Classifier,
    agent: ActionAgent,
    notifier: Arc<dyn NotificationSink>,
    prompts: Arc<PromptContext>,
    config: TriageConfig,
}

impl Orchestrator {
    pub fn new(
        classifier_llm: Arc<dyn LlmProvider>,
        action_llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        mut config: TriageConfig,
        temperature: f32,
    ) -> Self {
        // A respond decision always gets at least one agent turn.
        if config.max_turns == 0 {
            tracing::warn!("max_turns of 0 raised to 1");
            config.max_turns = 1;
        }
        let prompts = Arc::new(config.prompts.clone());
        Self {
            classifier: Classifier::new(classifier_llm, Arc::clone(&prompts), temperature),
            agent: ActionAgent::new(action_llm, tools, temperature),
            notifier: Arc::new(LogNotificationSink),
            prompts,
            config,
        }
    }

    /// Replace the notify sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Triage one email.
    ///
    /// Only classifier failures are returned as errors. Problems during the
    /// acting phase end up in the outcome's `Termination`.
    pub async fn triage(&self, email: Email) -> Result<TriageOutcome, TriageError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut tracker = RunTracker::new();

        let (classification, classifier_usage) = match self.classifier.classify_with_usage(&email).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(run = %run_id, subject = %email.subject, error = %e, "Classification failed");
                return Err(e);
            }
        };
        let mut estimated_cost = costs::cost_for(
            self.classifier.cost_per_token(),
            classifier_usage.input_tokens,
            classifier_usage.output_tokens,
        );
        let mut usage = classifier_usage;

        tracker.transition_to(TriageState::after_classification(classification.decision))?;
        tracing::info!(
            run = %run_id,
            from = %email.author,
            subject = %email.subject,
            decision = %classification.decision,
            "Email triaged"
        );

        let (action, messages) = match classification.decision {
            Decision::Ignore => (TriageAction::Ignored, Vec::new()),
            Decision::Notify => {
                self.notifier.notify(&email, &classification).await;
                (TriageAction::Notified, Vec::new())
            }
            Decision::Respond => {
                let acting = self.act(run_id, &email).await;
                tracker.transition_to(TriageState::TerminatedDone)?;

                estimated_cost += costs::cost_for(
                    self.agent.llm().cost_per_token(),
                    acting.usage.input_tokens,
                    acting.usage.output_tokens,
                );
                usage.add(acting.usage);

                tracing::info!(
                    run = %run_id,
                    termination = %acting.termination,
                    turns = acting.turns,
                    tool_calls = acting.tool_calls,
                    "Action loop finished"
                );
                (
                    TriageAction::Acted {
                        termination: acting.termination,
                        turns: acting.turns,
                        tool_calls: acting.tool_calls,
                        final_message: acting.final_message,
                    },
                    acting.messages,
                )
            }
        };

        tracing::debug!(
            run = %run_id,
            state = %tracker.state(),
            tokens = usage.total(),
            cost = %estimated_cost,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );

        Ok(TriageOutcome {
            run_id,
            email,
            classification,
            action,
            messages,
            usage,
            estimated_cost,
        })
    }

    /// Triage several emails with bounded concurrency. Each run owns its own
    /// state. Results come back in completion order, keyed by message id.
    pub async fn triage_batch(
        &self,
        emails: Vec<Email>,
    ) -> Vec<(Option<String>, Result<TriageOutcome, TriageError>)> {
        let limit = self.config.max_concurrent_triages.max(1);
        futures::stream::iter(emails.into_iter().map(|email| async move {
            let id = email.message_id.clone();
            (id, self.triage(email).await)
        }))
        .buffer_unordered(limit)
        .collect()
        .await
    }

    /// The acting phase for an email classified as respond.
    async fn act(&self, run_id: Uuid, email: &Email) -> ActingResult {
        let ctx = ToolContext::new(run_id).with_email_message_id(email.message_id.clone());
        let catalogue = self.agent.tools().catalogue().await;

        let mut state = ConversationState::new(email.clone(), Decision::Respond);
        state.push(ChatMessage::system(prompts::build_agent_system_prompt(
            &self.prompts,
            &catalogue,
        )));
        state.push(ChatMessage::user(prompts::build_agent_email_prompt(email)));

        let max_turns = self.config.max_turns;
        let mut usage = TokenUsage::default();
        let mut turns = 0;
        let mut nudges = 0;
        let mut final_message = None;

        let termination = loop {
            if turns >= max_turns {
                tracing::warn!(run = %run_id, turns, "Turn budget exhausted");
                break Termination::BudgetExhausted { turns };
            }
            turns += 1;

            debug_assert!(
                state.dangling_call_ids().is_empty(),
                "every tool call must be answered before the next turn"
            );
            let turn = match self.agent.step(&state).await {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!(run = %run_id, turn = turns, error = %e, "Action model failed");
                    break Termination::AgentFailed {
                        reason: e.to_string(),
                    };
                }
            };
            usage.add(turn.usage);
            state.push(turn.to_message());
            final_message = turn.content.clone();

            if !turn.has_tool_calls() {
                if state.tool_result_count() == 0 && nudges < self.config.max_tool_nudges {
                    nudges += 1;
                    tracing::debug!(run = %run_id, turn = turns, "No action taken yet, nudging");
                    state.push(ChatMessage::user(prompts::NUDGE_MESSAGE));
                    continue;
                }
                break Termination::Completed;
            }

            let mut done_called = false;
            for call in &turn.tool_calls {
                let content = self.dispatch(call, &state, &ctx).await;
                state.push(ChatMessage::tool_result(&call.id, &call.name, content));
                done_called |= call.name == DONE_TOOL_NAME;
            }
            if done_called {
                break Termination::DoneTool;
            }
        };

        ActingResult {
            termination,
            turns,
            tool_calls: state.tool_result_count(),
            final_message,
            usage,
            messages: state.into_messages(),
        }
    }

    /// Execute one call and return the text of its tool result.
    async fn dispatch(&self, call: &ToolCall, state: &ConversationState, ctx: &ToolContext) -> String {
        let Some(tool) = self.agent.tools().get(&call.name).await else {
            tracing::warn!(run = %ctx.run_id, tool = %call.name, "Model called unknown operation");
            return format!("Error: unknown operation {}", call.name);
        };

        if !tool.is_idempotent()
            && let Some(prior) = state.result_for(&call.id)
        {
            tracing::warn!(
                run = %ctx.run_id,
                tool = %call.name,
                call_id = %call.id,
                "Skipping replayed call to non-idempotent tool"
            );
            return format!(
                "Skipped: call {} was already executed. Previous result: {prior}",
                call.id
            );
        }

        let params = normalize_arguments(&call.arguments);
        tracing::debug!(
            run = %ctx.run_id,
            tool = %call.name,
            params = %params,
            "Tool call started"
        );

        let tool_timeout = tool.execution_timeout();
        let start = Instant::now();
        let result = tokio::time::timeout(tool_timeout, tool.execute(params, ctx)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                tracing::debug!(tool = %call.name, elapsed_ms, "Tool call succeeded");
                output.as_text()
            }
            Ok(Err(e)) => {
                tracing::debug!(tool = %call.name, elapsed_ms, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
            Err(_) => {
                tracing::debug!(tool = %call.name, elapsed_ms, "Tool call timed out");
                let e = ToolError::Timeout {
                    name: call.name.clone(),
                    timeout: tool_timeout,
                };
                format!("Error: {e}")
            }
        }
    }
}

/// Some providers hand arguments over as a JSON string, or as null when the
/// tool takes none.
fn normalize_arguments(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
        }
        other => other.clone(),
    }
}

/// Total estimated cost across outcomes.
pub fn total_cost<'a>(outcomes: impl IntoIterator<Item = &'a TriageOutcome>) -> Decimal {
    outcomes.into_iter().map(|o| o.estimated_cost).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, ToolCompletionRequest,
        ToolCompletionResponse,
    };
    use crate::tools::{Tool, ToolOutput};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Test doubles ────────────────────────────────────────────────

    /// Classifier model with a fixed answer.
    struct StaticClassifier(&'static str);

    #[async_trait]
    impl LlmProvider for StaticClassifier {
        fn model_name(&self) -> &str {
            "claude-sonnet-4-test"
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 100,
                output_tokens: 20,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            _req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            unreachable!()
        }
    }

    /// Action model replaying scripted turns; errors once the script runs out.
    struct ScriptedAgent {
        turns: Mutex<VecDeque<Vec<ToolCall>>>,
        requests: AtomicUsize,
    }

    impl ScriptedAgent {
        fn new(turns: Vec<Vec<ToolCall>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedAgent {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            unreachable!()
        }

        async fn complete_with_tools(
            &self,
            _req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let next = self.turns.lock().unwrap().pop_front();
            match next {
                Some(tool_calls) => Ok(ToolCompletionResponse {
                    content: None,
                    tool_calls,
                    input_tokens: 50,
                    output_tokens: 10,
                    finish_reason: FinishReason::ToolUse,
                    response_id: None,
                }),
                None => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "script exhausted".into(),
                }),
            }
        }
    }

    /// Counts executions; optionally non-idempotent or slow.
    struct CountingTool {
        name: &'static str,
        idempotent: bool,
        delay: Option<Duration>,
        runs: AtomicUsize,
    }

    impl CountingTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                idempotent: true,
                delay: None,
                runs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ToolOutput::text(format!("run {n}"), Duration::from_millis(1)))
        }
        fn is_idempotent(&self) -> bool {
            self.idempotent
        }
        fn execution_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    const RESPOND: &str = r#"{"reasoning": "needs a reply", "classification": "respond"}"#;

    fn email() -> Email {
        Email::new("alice@x.com", "me@x.com", "Meeting Request", "Tuesday?").with_message_id("m1")
    }

    fn orchestrator(agent: Arc<ScriptedAgent>, tools: Arc<ToolRegistry>, max_turns: usize) -> Orchestrator {
        let config = TriageConfig {
            max_turns,
            ..TriageConfig::default()
        };
        Orchestrator::new(Arc::new(StaticClassifier(RESPOND)), agent, tools, config, 0.0)
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_operation_becomes_error_result() {
        let agent = Arc::new(ScriptedAgent::new(vec![vec![call("c1", "archive_email")], vec![]]));
        let orch = orchestrator(agent, Arc::new(ToolRegistry::new()), 5);

        let outcome = orch.triage(email()).await.unwrap();
        let result = outcome
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert_eq!(result.content, "Error: unknown operation archive_email");
        assert_eq!(outcome.termination(), Some(&Termination::Completed));
    }

    #[tokio::test]
    async fn budget_exhausted_after_max_turns() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(CountingTool::new("peek"))).await;
        let script = (0..10).map(|i| vec![call(&format!("c{i}"), "peek")]).collect();
        let agent = Arc::new(ScriptedAgent::new(script));
        let orch = orchestrator(agent.clone(), tools, 3);

        let outcome = orch.triage(email()).await.unwrap();
        assert_eq!(
            outcome.termination(),
            Some(&Termination::BudgetExhausted { turns: 3 })
        );
        assert_eq!(agent.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_turn_budget_still_runs_one_turn() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(CountingTool::new("peek"))).await;
        let script = (0..3).map(|i| vec![call(&format!("c{i}"), "peek")]).collect();
        let agent = Arc::new(ScriptedAgent::new(script));
        let orch = orchestrator(agent.clone(), tools, 0);
        assert_eq!(orch.config().max_turns, 1);

        let outcome = orch.triage(email()).await.unwrap();
        assert_eq!(agent.requests.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.termination(),
            Some(&Termination::BudgetExhausted { turns: 1 })
        );
    }

    #[tokio::test]
    async fn replayed_non_idempotent_call_is_skipped() {
        let tools = Arc::new(ToolRegistry::new());
        let send = Arc::new(CountingTool {
            idempotent: false,
            ..CountingTool::new("send")
        });
        tools.register(send.clone()).await;
        let agent = Arc::new(ScriptedAgent::new(vec![
            vec![call("s1", "send")],
            vec![call("s1", "send")],
            vec![],
        ]));
        let orch = orchestrator(agent, tools, 5);

        let outcome = orch.triage(email()).await.unwrap();
        assert_eq!(send.runs.load(Ordering::SeqCst), 1);
        let skipped = outcome
            .messages
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("s1"))
            .nth(1)
            .unwrap();
        assert!(skipped.content.starts_with("Skipped: call s1"));
        assert!(skipped.content.ends_with("run 1"));
    }

    #[tokio::test]
    async fn slow_tool_times_out_into_error_result() {
        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(Arc::new(CountingTool {
                delay: Some(Duration::from_secs(5)),
                ..CountingTool::new("slow")
            }))
            .await;
        let agent = Arc::new(ScriptedAgent::new(vec![vec![call("c1", "slow")], vec![]]));
        let orch = orchestrator(agent, tools, 5);

        let outcome = orch.triage(email()).await.unwrap();
        let result = outcome
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(result.content.starts_with("Error: Tool slow timed out"));
    }

    #[tokio::test]
    async fn agent_failure_ends_run_gracefully() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(CountingTool::new("peek"))).await;
        // One scripted turn, then the model errors.
        let agent = Arc::new(ScriptedAgent::new(vec![vec![call("c1", "peek")]]));
        let orch = orchestrator(agent, tools, 5);

        let outcome = orch.triage(email()).await.unwrap();
        match outcome.termination() {
            Some(Termination::AgentFailed { reason }) => assert!(reason.contains("script exhausted")),
            other => panic!("unexpected termination: {other:?}"),
        }
        // Progress made before the failure is kept.
        assert!(outcome.messages.iter().any(|m| m.tool_call_id.as_deref() == Some("c1")));
    }

    #[tokio::test]
    async fn nudge_then_completed() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(CountingTool::new("peek"))).await;
        let agent = Arc::new(ScriptedAgent::new(vec![vec![], vec![]]));
        let orch = orchestrator(agent.clone(), tools, 5);

        let outcome = orch.triage(email()).await.unwrap();
        assert_eq!(outcome.termination(), Some(&Termination::Completed));
        // One nudge by default, so two model turns.
        assert_eq!(agent.requests.load(Ordering::SeqCst), 2);
        assert!(
            outcome
                .messages
                .iter()
                .any(|m| m.content == prompts::NUDGE_MESSAGE)
        );
    }

    #[tokio::test]
    async fn usage_and_cost_accumulate() {
        let agent = Arc::new(ScriptedAgent::new(vec![vec![call("c1", DONE_TOOL_NAME)]]));
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(crate::tools::builtin::DoneTool)).await;
        let orch = orchestrator(agent, tools, 5);

        let outcome = orch.triage(email()).await.unwrap();
        assert_eq!(outcome.termination(), Some(&Termination::DoneTool));
        assert_eq!(outcome.usage.input_tokens, 150);
        assert_eq!(outcome.usage.output_tokens, 30);
        // Only the classifier model is priced; the scripted one costs nothing.
        assert_eq!(outcome.estimated_cost, rust_decimal_macros::dec!(0.0006));
        assert_eq!(total_cost([&outcome]), outcome.estimated_cost);
    }

    #[test]
    fn string_arguments_are_parsed() {
        let args = serde_json::Value::String("{\"count\": 3}".into());
        assert_eq!(normalize_arguments(&args)["count"], 3);
        assert_eq!(normalize_arguments(&serde_json::Value::Null), serde_json::json!({}));
    }
}
