use crate::progress::GenerationSession;
use core::pin::Pin;
use core::task::{Context, Poll, ready};
use futures::Stream;
use pin_project_lite::pin_project;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

pin_project! {
    /// Live view of one session.
    ///
    /// Yields the snapshot current at subscription time first, then every
    /// later update in the order it was applied. Ends after a terminal
    /// snapshot, when the session is evicted, or when dropped. A subscriber
    /// that falls more than the channel capacity behind is dropped: the
    /// stream ends, and the caller can subscribe again for a fresh snapshot.
    #[must_use = "streams do nothing unless polled"]
    pub struct Subscription {
        initial: Option<Arc<GenerationSession>>,
        done: bool,
        #[pin]
        updates: BroadcastStream<Arc<GenerationSession>>,
    }
}

impl Subscription {
    pub(crate) fn new(
        snapshot: Arc<GenerationSession>,
        receiver: broadcast::Receiver<Arc<GenerationSession>>,
    ) -> Self {
        Self {
            initial: Some(snapshot),
            done: false,
            updates: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for Subscription {
    type Item = Arc<GenerationSession>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        if let Some(snapshot) = this.initial.take() {
            *this.done = snapshot.is_terminal();
            return Poll::Ready(Some(snapshot));
        }
        match ready!(this.updates.as_mut().poll_next(cx)) {
            Some(Ok(snapshot)) => {
                *this.done = snapshot.is_terminal();
                Poll::Ready(Some(snapshot))
            }
            // Full buffer: the subscriber is dropped.
            Some(Err(BroadcastStreamRecvError::Lagged(_skipped))) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Dropping subscriber that fell {_skipped} updates behind");
                *this.done = true;
                Poll::Ready(None)
            }
            None => {
                *this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
