use core::future::Future;
use core::time::Duration;

/// A trait that abstracts over how to wait between retry attempts.
///
/// Delays only suspend the calling task; nothing here blocks the runtime.
pub trait SleepProvider {
    fn sleep_for(dur: Duration) -> impl Future<Output = ()> + Send;
}

/// An implementation of [`SleepProvider`] using Tokio's timer.
///
/// This is the default provider. Under a paused Tokio clock the delay
/// auto-advances, which keeps tests fast.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    fn sleep_for(dur: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(dur)
    }
}

/// An implementation of [`SleepProvider`] using Tokio's yield.
///
/// Skips the delay entirely and only yields to the scheduler. Useful when the
/// caller already paces its own retries.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    fn sleep_for(_dur: Duration) -> impl Future<Output = ()> + Send {
        tokio::task::yield_now()
    }
}
