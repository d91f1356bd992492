//! Timeout and retry wrapper for model calls.
//!
//! Every call gets a hard per-call timeout. Transient failures (rate limits,
//! overload, 5xx, timeouts, dropped connections) are retried with exponential
//! backoff plus jitter; permanent failures and exhausted retries propagate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::{InferenceRequest, InferenceResponse, LlmClient, LlmError};

/// Backoff configuration for transient failures.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum backoff cap.
    pub max_delay: Duration,
    /// Multiplier per attempt (typically 2.0).
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay for a zero-based retry attempt, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Hard timeout for a single remote call.
    pub request_timeout: Duration,
    /// Additional attempts allowed after the first, transient errors only.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry `attempt`, honouring a server hint when present.
    fn sleep_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = match retry_after {
            Some(hint) => hint.min(self.backoff.max_delay),
            None => self.backoff.delay_for(attempt),
        };
        base + jitter(base)
    }
}

fn jitter(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() / 2) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// `LlmClient` decorator adding timeout and retry semantics.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        let mut attempt = 0u32;
        loop {
            let outcome =
                match tokio::time::timeout(self.policy.request_timeout, self.inner.complete(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout),
                };

            match outcome {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "Model call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.sleep_for(attempt, err.retry_after());
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient model error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(attempts = attempt + 1, error = %err, "Model call retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{text_response, ScriptedLlm};
    use crate::llm::Message;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            request_timeout: Duration::from_millis(200),
            max_retries,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                multiplier: 2.0,
            },
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            model: "m".to_string(),
            system: String::new(),
            messages: vec![Message::user("hello")],
            tools: vec![],
            max_tokens: 16,
            temperature: None,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_delay() {
        let policy = RetryPolicy {
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
            },
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.sleep_for(0, None);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
        let hinted = policy.sleep_for(0, Some(Duration::from_secs(30)));
        assert!(hinted >= Duration::from_secs(1));
        assert!(hinted <= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn succeeds_after_two_transient_failures() {
        let inner = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Unavailable(503)),
            Err(LlmError::RateLimited { retry_after: None }),
            Ok(text_response("ok")),
        ]));
        let client = RetryingClient::new(inner.clone(), fast_policy(2));

        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response.text(), "ok");
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::ServerError(500)),
            Err(LlmError::ServerError(502)),
            Err(LlmError::Unavailable(529)),
            Ok(text_response("never reached")),
        ]));
        let client = RetryingClient::new(inner.clone(), fast_policy(2));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(529)));
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let inner = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Api {
                status: 400,
                message: "bad request".to_string(),
            }),
            Ok(text_response("never reached")),
        ]));
        let client = RetryingClient::new(inner.clone(), fast_policy(2));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out_and_retry() {
        let inner = Arc::new(
            ScriptedLlm::new(vec![Ok(text_response("slow")), Ok(text_response("fast"))])
                .with_delays(vec![Duration::from_secs(5), Duration::ZERO]),
        );
        let client = RetryingClient::new(inner.clone(), fast_policy(1));

        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response.text(), "fast");
        assert_eq!(inner.call_count(), 2);
    }
}
