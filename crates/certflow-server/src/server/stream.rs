use axum::response::sse::Event;
use certflow::{GenerationSession, Subscription};
use core::convert::Infallible;
use core::time::Duration;
use futures::{Stream, StreamExt, stream};

/// Turns a session subscription into server-sent events.
///
/// Each snapshot is sent as a `progress` event, the terminal one as
/// `complete`. The stream closes after the terminal event, when the session
/// is evicted, or when no update arrives within `idle`.
pub fn session_events(
    subscription: Subscription,
    idle: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(subscription, move |mut subscription| async move {
        match tokio::time::timeout(idle, subscription.next()).await {
            Ok(Some(session)) => Some((Ok(to_event(&session)), subscription)),
            Ok(None) => None,
            Err(_elapsed) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Closing idle event stream after {idle:?}");
                None
            }
        }
    })
}

fn to_event(session: &GenerationSession) -> Event {
    let name = if session.is_terminal() {
        "complete"
    } else {
        "progress"
    };
    match Event::default().event(name).json_data(session) {
        Ok(event) => event,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to encode session {}: {_e}", session.id);
            Event::default().comment("encoding error")
        }
    }
}
