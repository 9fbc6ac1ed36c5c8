//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{CompletionModel, ToolDefinition as RigToolDefinition};
use rig::message::{
    AssistantContent, Message as RigMessage, ToolChoice as RigToolChoice, ToolResultContent,
    UserContent,
};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolChoice, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Anthropic rejects requests without an explicit output cap.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// `LlmProvider` backed by any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<(Vec<String>, Vec<ToolCall>, u32, u32), LlmError> {
        let (preamble, mut history) = convert_messages(messages);
        let prompt = history.pop().unwrap_or_else(|| RigMessage::user(""));

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .max_tokens(max_tokens.map(u64::from).unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(t) = temperature {
            builder = builder.temperature(f64::from(t));
        }
        if !tools.is_empty() {
            builder = builder.tools(tools.iter().map(convert_tool).collect());
            match tool_choice {
                ToolChoice::Auto => {}
                ToolChoice::Required => builder = builder.tool_choice(RigToolChoice::Required),
                ToolChoice::None => builder = builder.tool_choice(RigToolChoice::None),
            }
        }

        let response = self
            .model
            .completion(builder.build())
            .await
            .map_err(|e| classify_error(&self.model_name, e.to_string()))?;

        let mut texts = Vec::new();
        let mut calls = Vec::new();
        for content in response.choice.into_iter() {
            match content {
                AssistantContent::Text(text) => texts.push(text.text),
                AssistantContent::ToolCall(tc) => calls.push(ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                }),
                _ => {}
            }
        }

        Ok((
            texts,
            calls,
            saturating_tokens(response.usage.input_tokens),
            saturating_tokens(response.usage.output_tokens),
        ))
    }
}

fn saturating_tokens(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (texts, _, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &[],
                ToolChoice::Auto,
                request.temperature,
                request.max_tokens,
            )
            .await?;

        Ok(CompletionResponse {
            content: texts.join("\n"),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (texts, tool_calls, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &request.tools,
                request.tool_choice,
                request.temperature,
                request.max_tokens,
            )
            .await?;

        let content = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens,
            output_tokens,
            finish_reason,
            response_id: None,
        })
    }
}

fn classify_error(model: &str, reason: String) -> LlmError {
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited {
            provider: model.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("unauthorized") {
        LlmError::AuthFailed {
            provider: model.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: model.to_string(),
            reason,
        }
    }
}

fn convert_tool(tool: &ToolDefinition) -> RigToolDefinition {
    RigToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

/// Split our history into a rig preamble and rig messages.
///
/// Consecutive tool results are merged into one user message so every
/// `tool_use` block is answered by the message immediately after it.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<RigMessage>) {
    let mut system = Vec::new();
    let mut out = Vec::new();
    let mut pending_results: Vec<UserContent> = Vec::new();

    let flush = |pending: &mut Vec<UserContent>, out: &mut Vec<RigMessage>| {
        if let Ok(content) = OneOrMany::many(std::mem::take(pending)) {
            out.push(RigMessage::User { content });
        }
    };

    for msg in messages {
        if msg.role != Role::Tool {
            flush(&mut pending_results, &mut out);
        }
        match msg.role {
            Role::System => system.push(msg.content.clone()),
            Role::User => out.push(RigMessage::user(msg.content.clone())),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(AssistantContent::text(msg.content.clone()));
                }
                for call in msg.calls() {
                    parts.push(AssistantContent::tool_call(
                        call.id.clone(),
                        call.name.clone(),
                        call.arguments.clone(),
                    ));
                }
                let content = OneOrMany::many(parts)
                    .unwrap_or_else(|_| OneOrMany::one(AssistantContent::text("")));
                out.push(RigMessage::Assistant { id: None, content });
            }
            Role::Tool => {
                let id = msg.tool_call_id.clone().unwrap_or_default();
                pending_results.push(UserContent::tool_result(
                    id,
                    OneOrMany::one(ToolResultContent::text(msg.content.clone())),
                ));
            }
        }
    }
    flush(&mut pending_results, &mut out);

    let preamble = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (preamble, out)
}
