use crate::error::{ClassifiedError, ErrorCategory, ErrorContext, OperationError};
use crate::retry::{RetryExecutor, RetryPolicy, TokioSleep, TokioYield, with_retry};
use core::time::Duration;
use std::sync::atomic::{AtomicU32, Ordering};

fn context() -> ErrorContext {
    ErrorContext::new("render_pdf").with("transactionId", "tx-42")
}

#[tokio::test(start_paused = true)]
async fn network_failures_are_retried_until_success() {
    let attempts = AtomicU32::new(0);
    let started = tokio::time::Instant::now();

    let result = with_retry(
        |_| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(OperationError::categorized(
                    ErrorCategory::Network,
                    "connection reset by peer",
                ))
            } else {
                Ok("rendered")
            }
        },
        &context(),
        3,
    )
    .await;

    assert_eq!(result.unwrap(), "rendered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn validation_failures_are_not_retried() {
    let attempts = AtomicU32::new(0);

    let err = with_retry(
        |_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("holder name is required")
        },
        &context(),
        5,
    )
    .await
    .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(err.category, ErrorCategory::Validation);
    assert_eq!(err.context.get("attempt"), Some(&1.into()));
    assert_eq!(err.context.operation(), Some("render_pdf"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_return_last_error() {
    let attempts = AtomicU32::new(0);
    let executor = RetryExecutor::<TokioSleep>::new(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(250),
    });

    let err = executor
        .run(&context(), |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("pdf render crashed on attempt {attempt}")) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(err.category, ErrorCategory::RenderFailure);
    assert_eq!(err.message, "pdf render crashed on attempt 2");
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn preclassified_errors_use_their_own_flag() {
    let attempts = AtomicU32::new(0);
    let executor = RetryExecutor::<TokioYield>::new(RetryPolicy::default().with_max_attempts(4));

    let err = executor
        .run(&context(), |_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            // Database errors are retryable by default; this one opted out.
            Err::<(), _>(
                ClassifiedError::new(ErrorCategory::Database, "unique violation")
                    .with_code("NUMBER_CONFLICT")
                    .with_retryable(false),
            )
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(err.code, "NUMBER_CONFLICT");
}

#[tokio::test]
async fn unknown_failures_fail_closed() {
    let attempts = AtomicU32::new(0);
    let executor = RetryExecutor::<TokioYield>::new(RetryPolicy::default().with_max_attempts(3));

    let err = executor
        .run(&context(), |_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("flux capacitor misaligned")
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(err.category, ErrorCategory::Unknown);
}

#[test]
fn zero_attempt_budget_still_runs_once() {
    let policy = RetryPolicy::default().with_max_attempts(0);
    assert_eq!(policy.delay_for(3), Duration::from_secs(3));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let attempts = AtomicU32::new(0);
    let result = rt.block_on(RetryExecutor::<TokioYield>::new(policy).run(&context(), |_| async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Ok::<_, OperationError>(7)
    }));
    assert_eq!(result.unwrap(), 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
