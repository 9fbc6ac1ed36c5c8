//! Retry wrapper for transient provider failures.
//!
//! Only the model-invocation layer retries. The classifier and the action
//! agent see either a response or the final error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ToolCompletionRequest,
    ToolCompletionResponse,
};

/// Backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): exponential, capped, with
    /// up to 25% random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Provider that retries transient failures of an inner provider.
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn backoff(&self, attempt: u32, err: &LlmError) {
        let delay = match err {
            LlmError::RateLimited {
                retry_after: Some(after),
                ..
            } => (*after).min(self.config.max_delay),
            _ => self.config.delay_for(attempt),
        };
        tracing::warn!(
            model = %self.inner.model_name(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "LLM call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete_with_tools(request.clone()).await {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::llm::provider::FinishReason;

    /// Fails the first `failures` calls with the given error kind.
    struct FlakyLlm {
        failures: u32,
        calls: AtomicU32,
        auth_error: bool,
    }

    impl FlakyLlm {
        fn error(&self) -> LlmError {
            if self.auth_error {
                LlmError::AuthFailed {
                    provider: "flaky".into(),
                }
            } else {
                LlmError::RequestFailed {
                    provider: "flaky".into(),
                    reason: "connection reset".into(),
                }
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyLlm {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error());
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error());
            }
            Ok(ToolCompletionResponse {
                content: None,
                tool_calls: vec![],
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let inner = Arc::new(FlakyLlm {
            failures: 2,
            calls: AtomicU32::new(0),
            auth_error: false,
        });
        let provider = RetryProvider::new(inner.clone(), fast_config(3));
        let resp = provider
            .complete(CompletionRequest::new(vec![]))
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(FlakyLlm {
            failures: 10,
            calls: AtomicU32::new(0),
            auth_error: false,
        });
        let provider = RetryProvider::new(inner.clone(), fast_config(2));
        let result = provider
            .complete_with_tools(ToolCompletionRequest::new(vec![], vec![]))
            .await;
        assert!(result.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let inner = Arc::new(FlakyLlm {
            failures: 1,
            calls: AtomicU32::new(0),
            auth_error: true,
        });
        let provider = RetryProvider::new(inner.clone(), fast_config(3));
        let result = provider.complete(CompletionRequest::new(vec![])).await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        // 400ms cap plus at most 25% jitter
        assert!(config.delay_for(8) <= Duration::from_millis(500));
        assert!(config.delay_for(0) >= Duration::from_millis(100));
    }
}
