//! Classifier: decides whether an email is ignored, surfaced, or answered.

use std::sync::Arc;

use crate::error::TriageError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::triage::prompts::{self, PromptContext};
use crate::triage::types::{Classification, Decision, Email, TokenUsage};

/// Max tokens for the classifier response.
const CLASSIFIER_MAX_TOKENS: u32 = 1024;

/// Classifies one email per call. Holds no per-email state.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptContext>,
    temperature: f32,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, prompts: Arc<PromptContext>, temperature: f32) -> Self {
        Self {
            llm,
            prompts,
            temperature,
        }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
        self.llm.cost_per_token()
    }

    /// Classify an email.
    pub async fn classify(&self, email: &Email) -> Result<Classification, TriageError> {
        self.classify_with_usage(email).await.map(|(c, _)| c)
    }

    /// Classify an email, also returning the tokens spent.
    pub async fn classify_with_usage(
        &self,
        email: &Email,
    ) -> Result<(Classification, TokenUsage), TriageError> {
        email.validate()?;

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::build_triage_system_prompt(&self.prompts)),
            ChatMessage::user(prompts::build_triage_user_prompt(email)),
        ])
        .with_max_tokens(CLASSIFIER_MAX_TOKENS)
        .with_temperature(self.temperature);

        let response = self.llm.complete(request).await?;
        let usage = TokenUsage::new(response.input_tokens, response.output_tokens);

        let classification = parse_classification(&response.content)?;
        tracing::debug!(
            decision = %classification.decision,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Email classified"
        );
        Ok((classification, usage))
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Classifier response structure. Both fields are required.
#[derive(Debug, serde::Deserialize)]
struct RouterResponse {
    reasoning: String,
    classification: String,
}

/// Parse and validate the classifier's raw text.
pub fn parse_classification(raw: &str) -> Result<Classification, TriageError> {
    let schema_error = |reason: String| TriageError::SchemaValidation {
        reason,
        raw: raw.to_string(),
    };

    let json_str = extract_json_object(raw);
    let response: RouterResponse = serde_json::from_str(&json_str)
        .map_err(|e| schema_error(format!("JSON parse error: {e}")))?;

    let reasoning = response.reasoning.trim();
    if reasoning.is_empty() {
        return Err(schema_error("reasoning is empty".into()));
    }
    let decision: Decision = response.classification.parse().map_err(schema_error)?;

    Ok(Classification {
        decision,
        reasoning: reasoning.to_string(),
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
