use crate::config::RetryConfig;
use crate::error::{ClassifiedError, ErrorContext, OperationError, classify};
use crate::retry::{SleepProvider, TokioSleep};
use core::future::Future;
use core::marker::PhantomData;
use core::time::Duration;

/// Attempt budget and linear back-off for a [`RetryExecutor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// The wait before attempt `n + 1` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
        }
    }
}

impl RetryPolicy {
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs fallible operations under a taxonomy-aware retry policy.
///
/// Each failure is classified (or passed through if already classified),
/// logged with its context, and then either retried after a linear back-off
/// or returned. Only retryable categories are retried. The executor holds no
/// shared mutable state and never spawns work; its delays suspend only the
/// calling task.
///
/// The sleep strategy is a type parameter so tests and callers can swap
/// Tokio's timer for a plain yield.
pub struct RetryExecutor<S = TokioSleep> {
    policy: RetryPolicy,
    _sleep: PhantomData<fn() -> S>,
}

impl<S> Clone for RetryExecutor<S> {
    fn clone(&self) -> Self {
        Self::new(self.policy)
    }
}

impl<S> core::fmt::Debug for RetryExecutor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for RetryExecutor<TokioSleep> {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl<S> RetryExecutor<S> {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            _sleep: PhantomData,
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<S: SleepProvider> RetryExecutor<S> {
    /// Runs `operation` until it succeeds, fails with a non-retryable error, or
    /// exhausts the attempt budget.
    ///
    /// The closure receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the [`ClassifiedError`] of the last failed attempt. Its context
    /// carries `attempt` and `maxAttempts` alongside `context`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(operation = ?context.operation())))]
    pub async fn run<T, E, F, Fut>(
        &self,
        context: &ErrorContext,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Operation succeeded on attempt {attempt}/{max_attempts}");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let mut err = classify(e, context)
                        .with_field("attempt", attempt)
                        .with_field("maxAttempts", max_attempts);
                    err.report_once();

                    if !err.is_retryable || attempt >= max_attempts {
                        return Err(err);
                    }

                    let delay = self.policy.delay_for(attempt);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        correlation_id = %err.correlation_id,
                        "Retrying in {delay:?} (attempt {attempt}/{max_attempts})"
                    );
                    S::sleep_for(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Runs `operation` with the default one-second base delay and the given
/// attempt budget.
///
/// # Errors
///
/// See [`RetryExecutor::run`].
pub async fn with_retry<T, E, F, Fut>(
    operation: F,
    context: &ErrorContext,
    max_attempts: u32,
) -> Result<T, ClassifiedError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<OperationError>,
{
    RetryExecutor::<TokioSleep>::new(RetryPolicy::default().with_max_attempts(max_attempts))
        .run(context, operation)
        .await
}
