use crate::config::TrackerConfig;
use crate::progress::{
    ExpiryKind, ExpiryQueue, GenerationSession, Metadata, SessionId, SessionStatus, Stage,
    Subscription,
};
use chrono::Utc;
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-session options for [`ProgressTracker::start`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Quiet period before the session times out. Defaults to
    /// [`TrackerConfig::default_timeout`].
    pub timeout: Option<Duration>,
}

struct SlotState {
    session: GenerationSession,
    started: Instant,
    touched: Instant,
    timeout: Duration,
}

struct SessionSlot {
    state: Mutex<SlotState>,
    updates: broadcast::Sender<Arc<GenerationSession>>,
}

impl SessionSlot {
    /// Publishes the current snapshot. Called with the state lock held so
    /// that every subscriber sees updates in application order.
    fn publish(&self, state: &SlotState) {
        if self.updates.receiver_count() > 0 {
            // Only fails when every receiver is gone.
            let _ = self.updates.send(Arc::new(state.session.clone()));
        }
    }
}

struct TrackerInner {
    config: TrackerConfig,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    expiries: Arc<ExpiryQueue>,
    shutdown: CancellationToken,
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// In-memory registry of generation sessions.
///
/// Every mutation of one session is serialized by that session's lock and
/// published to its subscribers before the lock is released. Timeouts,
/// evictions and the stale-session sweep run on one background task; the
/// tracker never spawns a task per session.
///
/// Operations on unknown ids are no-ops and never panic. Cloning yields
/// another handle to the same registry.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl core::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("sessions", &self.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Creates a tracker and spawns its sweeper on the current Tokio runtime.
    ///
    /// A zero channel capacity is raised to one.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(mut config: TrackerConfig) -> Self {
        config.channel_capacity = config.channel_capacity.max(1);
        let expiries = Arc::new(ExpiryQueue::default());
        let shutdown = CancellationToken::new();
        let reap_interval = config.reap_interval;
        let inner = Arc::new(TrackerInner {
            config,
            sessions: RwLock::new(HashMap::new()),
            expiries: Arc::clone(&expiries),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(sweep(
            Arc::downgrade(&inner),
            expiries,
            shutdown,
            reap_interval,
        ));

        Self { inner }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Registers a `pending` session and arms its timeout.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub fn start(&self, transaction_id: &str, user_id: &str, options: StartOptions) -> SessionId {
        let now = Utc::now();
        let started = Instant::now();
        let id = SessionId::generate(transaction_id, user_id, now);
        let timeout = options.timeout.unwrap_or(self.inner.config.default_timeout);

        let (updates, _) = broadcast::channel(self.inner.config.channel_capacity);
        let slot = Arc::new(SessionSlot {
            state: Mutex::new(SlotState {
                session: GenerationSession::new(id.clone(), transaction_id, user_id, now),
                started,
                touched: started,
                timeout,
            }),
            updates,
        });
        self.inner.sessions.write().insert(id.clone(), slot);
        self.inner
            .expiries
            .schedule(started + timeout, id.clone(), ExpiryKind::Timeout);

        #[cfg(feature = "tracing")]
        tracing::debug!("Started session {id} (timeout {timeout:?})");
        id
    }

    /// Records progress of `stage`.
    ///
    /// The percentage is clamped to `0..=100` and a stage never moves
    /// backwards: a lower value keeps the previous one while the message is
    /// still updated. Each call pushes the timeout deadline forward. On a
    /// terminal session only `metadata` is merged: nothing is published and
    /// neither `updated_at` nor the reap age changes.
    ///
    /// Returns `false` if the session is unknown.
    pub fn advance(
        &self,
        id: &str,
        stage: Stage,
        percent: f64,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> bool {
        let Some(slot) = self.slot(id) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Progress update for unknown session {id}");
            return false;
        };
        let now = Instant::now();
        let mut state = slot.state.lock();
        let elapsed = now.saturating_duration_since(state.started);
        let live = state.session.apply_progress(
            stage,
            percent,
            message.into(),
            metadata,
            Utc::now(),
            elapsed,
        );
        // Terminal subscriptions have already ended and the reap clock keeps
        // running from the terminal transition.
        if live {
            state.touched = now;
            slot.publish(&state);
        }
        true
    }

    /// Completes every unfinished stage and the session. Returns `false` if
    /// the session is unknown or already terminal.
    pub fn complete(&self, id: &str, metadata: Option<Metadata>) -> bool {
        self.terminate(id, "complete", |session| {
            session.complete(metadata, Utc::now())
        })
    }

    /// Fails `stage` and the session with `error`. Returns `false` if the
    /// session is unknown or already terminal.
    pub fn fail(&self, id: &str, stage: Stage, error: &str) -> bool {
        self.terminate(id, "fail", |session| session.fail(stage, error, Utc::now()))
    }

    /// Cancels a live session. Returns `false` if the session is unknown or
    /// already terminal.
    pub fn cancel(&self, id: &str) -> bool {
        self.terminate(id, "cancel", |session| session.cancel(Utc::now()))
    }

    /// Subscribes to a session. See [`Subscription`].
    pub fn subscribe(&self, id: &str) -> Option<Subscription> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        // Snapshot and receiver are taken under one lock so no update is
        // missed or seen twice.
        Some(Subscription::new(
            Arc::new(state.session.clone()),
            slot.updates.subscribe(),
        ))
    }

    pub fn get_progress(&self, id: &str) -> Option<GenerationSession> {
        let slot = self.slot(id)?;
        let session = slot.state.lock().session.clone();
        Some(session)
    }

    /// Snapshots of every session that is not terminal.
    pub fn active_sessions(&self) -> Vec<GenerationSession> {
        self.slots()
            .into_iter()
            .filter_map(|slot| {
                let state = slot.state.lock();
                (!state.session.is_terminal()).then(|| state.session.clone())
            })
            .collect()
    }

    /// Number of registered sessions, terminal ones included until evicted.
    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every session untouched for longer than
    /// [`TrackerConfig::max_session_age`], regardless of status. Runs
    /// periodically on the sweeper; returns the number removed.
    pub fn reap(&self) -> usize {
        self.inner.reap(Instant::now())
    }

    /// Stops the background sweeper. Sessions stay readable, but timeouts
    /// and evictions no longer fire.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn slot(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.inner.sessions.read().get(id).cloned()
    }

    fn slots(&self) -> Vec<Arc<SessionSlot>> {
        self.inner.sessions.read().values().cloned().collect()
    }

    fn terminate(
        &self,
        id: &str,
        _op: &'static str,
        transition: impl FnOnce(&mut GenerationSession) -> bool,
    ) -> bool {
        let Some(slot) = self.slot(id) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Cannot {_op} unknown session {id}");
            return false;
        };
        let mut state = slot.state.lock();
        if !transition(&mut state.session) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ignoring {_op} for session {id}: already {}", state.session.status);
            return false;
        }
        let now = Instant::now();
        state.touched = now;
        slot.publish(&state);
        self.inner.schedule_eviction(&state.session, now);
        let _status = state.session.status;
        drop(state);

        #[cfg(feature = "tracing")]
        tracing::info!("Session {id} is now {_status}");
        true
    }
}

impl TrackerInner {
    fn slot(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.read().get(id).cloned()
    }

    fn schedule_eviction(&self, session: &GenerationSession, now: Instant) {
        let delay = match session.status {
            SessionStatus::Cancelled => self.config.cancelled_eviction,
            _ => self.config.terminal_eviction,
        };
        self.expiries
            .schedule(now + delay, session.id.clone(), ExpiryKind::Evict);
    }

    /// Times the session out if it has been quiet for its full timeout, or
    /// re-arms the check for when it will have been.
    fn check_timeout(&self, id: &SessionId, now: Instant) {
        let Some(slot) = self.slot(id) else {
            return;
        };
        let mut state = slot.state.lock();
        if state.session.is_terminal() {
            return;
        }
        let due = state.touched + state.timeout;
        if due > now {
            self.expiries.schedule(due, id.clone(), ExpiryKind::Timeout);
            return;
        }
        if state.session.time_out(Utc::now()) {
            state.touched = now;
            slot.publish(&state);
            self.schedule_eviction(&state.session, now);
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Session {id} timed out at stage {} after {:?}",
                state.session.stage,
                state.timeout
            );
        }
    }

    fn evict(&self, id: &SessionId) {
        if self.sessions.write().remove(id).is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Evicted session {id}");
        }
    }

    fn reap(&self, now: Instant) -> usize {
        let max_age = self.config.max_session_age;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, slot| now.saturating_duration_since(slot.state.lock().touched) < max_age);
        let reaped = before - sessions.len();
        drop(sessions);

        if reaped > 0 {
            #[cfg(feature = "tracing")]
            tracing::info!("Reaped {reaped} stale sessions");
        }
        reaped
    }
}

/// Background task firing timeouts, evictions and the periodic reap.
///
/// Holds the tracker weakly and exits once it is dropped or shut down.
async fn sweep(
    tracker: Weak<TrackerInner>,
    expiries: Arc<ExpiryQueue>,
    shutdown: CancellationToken,
    reap_interval: Duration,
) {
    let mut next_reap = Instant::now() + reap_interval;
    loop {
        {
            let Some(inner) = tracker.upgrade() else {
                break;
            };
            let now = Instant::now();
            while let Some(expiry) = expiries.pop_due(now) {
                match expiry.kind {
                    ExpiryKind::Timeout => inner.check_timeout(&expiry.id, now),
                    ExpiryKind::Evict => inner.evict(&expiry.id),
                }
            }
            if next_reap <= now {
                inner.reap(now);
                next_reap = now + reap_interval;
            }
        }

        let deadline = expiries
            .next_deadline()
            .map_or(next_reap, |at| at.min(next_reap));
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = expiries.changed() => {}
            () = tokio::time::sleep_until(deadline) => {}
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Progress sweeper stopped");
}
