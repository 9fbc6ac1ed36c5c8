//! Action agent: one model turn in "must act" mode.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::LlmError;
use crate::llm::{ChatMessage, LlmProvider, ToolCall, ToolChoice, ToolCompletionRequest};
use crate::tools::ToolRegistry;
use crate::triage::state::ConversationState;
use crate::triage::types::TokenUsage;

/// Max tokens per agent turn.
const AGENT_MAX_TOKENS: u32 = 4096;

/// One assistant turn.
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl AssistantTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Assistant message to append to the conversation.
    pub fn to_message(&self) -> ChatMessage {
        if self.tool_calls.is_empty() {
            ChatMessage::assistant(self.content.clone().unwrap_or_default())
        } else {
            ChatMessage::assistant_with_tool_calls(self.content.clone(), self.tool_calls.clone())
        }
    }
}

/// Drives the action model against the tool registry.
pub struct ActionAgent {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    temperature: f32,
}

impl ActionAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, temperature: f32) -> Self {
        Self {
            llm,
            tools,
            temperature,
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Ask the model for its next turn given the whole conversation.
    pub async fn step(&self, state: &ConversationState) -> Result<AssistantTurn, LlmError> {
        let request = ToolCompletionRequest::new(
            state.messages().to_vec(),
            self.tools.tool_definitions().await,
        )
        .with_tool_choice(ToolChoice::Required)
        .with_temperature(self.temperature)
        .with_max_tokens(AGENT_MAX_TOKENS);

        let response = self.llm.complete_with_tools(request).await?;

        let tool_calls = response
            .tool_calls
            .into_iter()
            .map(|mut call| {
                if call.id.trim().is_empty() {
                    call.id = format!("call_{}", Uuid::new_v4().simple());
                }
                call
            })
            .collect();

        Ok(AssistantTurn {
            content: response.content.filter(|c| !c.trim().is_empty()),
            tool_calls,
            usage: TokenUsage::new(response.input_tokens, response.output_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, ToolCompletionResponse,
    };
    use crate::tools::builtin::DoneTool;
    use crate::triage::types::{Decision, Email};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the last request and answers with fixed calls.
    struct RecordingLlm {
        calls: Vec<ToolCall>,
        seen: Mutex<Option<ToolCompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            unreachable!()
        }

        async fn complete_with_tools(
            &self,
            req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            *self.seen.lock().unwrap() = Some(req);
            Ok(ToolCompletionResponse {
                content: Some("   ".into()),
                tool_calls: self.calls.clone(),
                input_tokens: 10,
                output_tokens: 4,
                finish_reason: FinishReason::ToolUse,
                response_id: None,
            })
        }
    }

    #[tokio::test]
    async fn step_requires_tools_and_fills_missing_ids() {
        let llm = Arc::new(RecordingLlm {
            calls: vec![
                ToolCall {
                    id: String::new(),
                    name: "done".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCall {
                    id: "keep".into(),
                    name: "done".into(),
                    arguments: serde_json::json!({}),
                },
            ],
            seen: Mutex::new(None),
        });
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(DoneTool)).await;
        let agent = ActionAgent::new(llm.clone(), registry, 0.0);

        let mut state =
            ConversationState::new(Email::new("a@x.com", "me@x.com", "Hi", ""), Decision::Respond);
        state.push(ChatMessage::system("sys"));
        state.push(ChatMessage::user("email"));

        let turn = agent.step(&state).await.unwrap();
        assert!(turn.tool_calls[0].id.starts_with("call_"));
        assert_eq!(turn.tool_calls[1].id, "keep");
        assert_eq!(turn.content, None);
        assert_eq!(turn.usage.total(), 14);

        let seen = llm.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.tool_choice, ToolChoice::Required);
        assert_eq!(seen.messages.len(), 2);
        assert_eq!(seen.tools.len(), 1);
    }

    #[test]
    fn turn_message_shape() {
        let turn = AssistantTurn {
            content: Some("All set.".into()),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        };
        let msg = turn.to_message();
        assert_eq!(msg.content, "All set.");
        assert!(msg.calls().is_empty());
    }
}
