//! Retry-with-fallback composition of text-generation providers.
//!
//! ```text
//! attempt 0: primary ─fail─> fallback ─fail─> sleep(base)
//! attempt 1: primary ─fail─> fallback ─fail─> sleep(base * 2)
//! ...
//! attempt N: primary ─fail─> fallback ─fail─> Err
//! ```
//!
//! Callers see one logical call; which provider answered is only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ra_core::{AppError, Result, TextGenerationPort};
use tracing::{debug, warn};

/// Timeout and backoff for one logical generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per provider call.
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based): base * 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

pub struct RetryingGenerator {
    primary: Arc<dyn TextGenerationPort>,
    fallback: Option<Arc<dyn TextGenerationPort>>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(primary: Arc<dyn TextGenerationPort>, policy: RetryPolicy) -> Self {
        Self { primary, fallback: None, policy }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TextGenerationPort>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn providers(&self) -> impl Iterator<Item = &Arc<dyn TextGenerationPort>> {
        std::iter::once(&self.primary).chain(self.fallback.as_ref())
    }

    async fn call_once(
        &self,
        provider: &dyn TextGenerationPort,
        system_prompt: &str,
        user_prompt: &str,
    ) -> anyhow::Result<String> {
        match tokio::time::timeout(self.policy.timeout, provider.generate(system_prompt, user_prompt))
            .await
        {
            Ok(result) => result,
            Err(_) => anyhow::bail!("timed out after {:?}", self.policy.timeout),
        }
    }
}

#[async_trait]
impl TextGenerationPort for RetryingGenerator {
    fn name(&self) -> String {
        match &self.fallback {
            Some(fallback) => format!("{}|{}", self.primary.name(), fallback.name()),
            None => self.primary.name(),
        }
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let mut last_err = None;
        for attempt in 0..=self.policy.max_retries {
            for provider in self.providers() {
                match self.call_once(provider.as_ref(), system_prompt, user_prompt).await {
                    Ok(text) => {
                        debug!(provider = %provider.name(), attempt, "generation served");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(provider = %provider.name(), attempt, error = %e, "generation attempt failed");
                        last_err = Some(e);
                    }
                }
            }
            if attempt < self.policy.max_retries {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no providers configured"));
        Err(err.context(format!(
            "text generation failed after {} attempts",
            self.policy.max_retries + 1
        )))
    }
}

/// Calls the port and maps exhaustion to [`AppError::ExternalService`].
pub async fn generate_text(
    port: &dyn TextGenerationPort,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<String> {
    port.generate(system_prompt, user_prompt)
        .await
        .map_err(|e| AppError::ExternalService(format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_core::MockTextGenerationPort;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            timeout: Duration::from_millis(200),
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    fn failing(name: &'static str, times: usize) -> MockTextGenerationPort {
        let mut mock = MockTextGenerationPort::new();
        mock.expect_name().returning(move || name.to_string());
        mock.expect_generate()
            .times(times)
            .returning(|_, _| Err(anyhow::anyhow!("503 upstream")));
        mock
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fallback_serves_when_primary_fails() {
        let primary = failing("primary", 1);
        let mut fallback = MockTextGenerationPort::new();
        fallback.expect_name().returning(|| "fallback".to_string());
        fallback.expect_generate().times(1).returning(|_, _| Ok("from fallback".to_string()));

        let generator = RetryingGenerator::new(Arc::new(primary), instant_policy(3))
            .with_fallback(Arc::new(fallback));
        assert_eq!(generator.generate("sys", "user").await.unwrap(), "from fallback");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let generator = RetryingGenerator::new(Arc::new(failing("primary", 4)), instant_policy(3))
            .with_fallback(Arc::new(failing("fallback", 4)));
        let err = generate_text(&generator, "sys", "user").await.unwrap_err();
        assert!(matches!(err, AppError::ExternalService(msg) if msg.contains("4 attempts")));
    }

    #[tokio::test]
    async fn test_recovers_on_retry() {
        let mut primary = MockTextGenerationPort::new();
        primary.expect_name().returning(|| "primary".to_string());
        let mut seq = mockall::Sequence::new();
        primary
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("connection reset")));
        primary
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("second time lucky".to_string()));

        let generator = RetryingGenerator::new(Arc::new(primary), instant_policy(3));
        assert_eq!(generator.generate("s", "u").await.unwrap(), "second time lucky");
    }

    struct SlowPort;

    #[async_trait]
    impl TextGenerationPort for SlowPort {
        fn name(&self) -> String {
            "slow".into()
        }

        async fn generate(&self, _: &str, _: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test]
    async fn test_each_call_is_bounded_by_timeout() {
        let policy = RetryPolicy { timeout: Duration::from_millis(20), ..instant_policy(1) };
        let generator = RetryingGenerator::new(Arc::new(SlowPort), policy);
        let err = generator.generate("s", "u").await.unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
    }
}
