use crate::ids::{SUFFIX_LEN, random_suffix};
use crate::progress::{SessionStatus, Stage, StageProgress, StageStatus, clamp_percent};
use chrono::{DateTime, Utc};
use core::borrow::Borrow;
use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open key/value bag carried by a session.
pub type Metadata = Map<String, Value>;

/// Opaque, never reused handle of a generation session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// `gen_<transactionId>_<userId>_<unixMillis>_<random>`.
    pub fn generate(transaction_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self(format!(
            "gen_{transaction_id}_{user_id}_{}_{}",
            now.timestamp_millis(),
            random_suffix(SUFFIX_LEN)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Snapshot of one in-flight certificate generation.
///
/// Once `status` is terminal only `metadata` may change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSession {
    pub id: SessionId,
    pub transaction_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub stage: Stage,
    /// Rounded mean of all stage percentages.
    #[serde(rename = "progress")]
    pub overall_progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds, extrapolated from elapsed time and overall progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    pub stage_progress: Vec<StageProgress>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

pub(crate) const TIMEOUT_MESSAGE: &str = "Generation timed out";

impl GenerationSession {
    pub fn new(id: SessionId, transaction_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            status: SessionStatus::Pending,
            stage: Stage::Initializing,
            overall_progress: 0,
            message: "Generation queued".to_string(),
            error: None,
            estimated_time_remaining: None,
            stage_progress: Stage::ALL.into_iter().map(StageProgress::pending).collect(),
            metadata: Metadata::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stage_record(&self, stage: Stage) -> &StageProgress {
        &self.stage_progress[stage.index()]
    }

    /// Applies a progress report. `elapsed` is the time since the session
    /// started and drives the remaining-time estimate.
    ///
    /// On a terminal session only `metadata` is merged and `false` is
    /// returned; every other field, `updated_at` included, stays as it was.
    pub(crate) fn apply_progress(
        &mut self,
        stage: Stage,
        percent: f64,
        message: String,
        metadata: Option<Metadata>,
        now: DateTime<Utc>,
        elapsed: Duration,
    ) -> bool {
        if let Some(patch) = metadata {
            self.metadata.extend(patch);
        }
        if self.is_terminal() {
            return false;
        }
        self.updated_at = now;

        let percent = clamp_percent(percent);
        let record = &mut self.stage_progress[stage.index()];
        record.touch(now);
        record.message.clone_from(&message);
        if percent > record.progress {
            record.progress = percent;
        }
        if record.progress == 100 && record.status != StageStatus::Completed {
            record.finish(now);
        }

        self.status = SessionStatus::InProgress;
        self.stage = stage;
        self.message = message;
        self.overall_progress = self.mean_progress();
        self.estimated_time_remaining = match u64::from(self.overall_progress) {
            0 => None,
            overall => {
                let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                Some(elapsed.saturating_mul(100 - overall) / overall)
            }
        };
        true
    }

    /// Returns `false` without touching anything if already terminal.
    pub(crate) fn complete(&mut self, metadata: Option<Metadata>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        for record in &mut self.stage_progress {
            if record.status != StageStatus::Completed {
                record.finish(now);
            }
        }
        if let Some(patch) = metadata {
            self.metadata.extend(patch);
        }
        self.status = SessionStatus::Completed;
        self.stage = Stage::Completed;
        self.overall_progress = 100;
        self.estimated_time_remaining = Some(0);
        self.message = "Certificate generated".to_string();
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Returns `false` without touching anything if already terminal.
    pub(crate) fn fail(&mut self, stage: Stage, error: &str, now: DateTime<Utc>) -> bool {
        self.terminate(SessionStatus::Failed, stage, error, now)
    }

    /// Fails the current stage with [`TIMEOUT_MESSAGE`].
    pub(crate) fn time_out(&mut self, now: DateTime<Utc>) -> bool {
        self.terminate(SessionStatus::Timeout, self.stage, TIMEOUT_MESSAGE, now)
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Cancelled;
        self.message = "Generation cancelled".to_string();
        self.estimated_time_remaining = None;
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    fn terminate(
        &mut self,
        status: SessionStatus,
        stage: Stage,
        error: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        let record = &mut self.stage_progress[stage.index()];
        record.touch(now);
        record.status = StageStatus::Failed;
        record.error = Some(error.to_string());

        self.status = status;
        self.stage = stage;
        self.message = error.to_string();
        self.error = Some(error.to_string());
        self.estimated_time_remaining = None;
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    fn mean_progress(&self) -> u8 {
        let total: u32 = self
            .stage_progress
            .iter()
            .map(|r| u32::from(r.progress))
            .sum();
        let count = u32::try_from(self.stage_progress.len()).unwrap_or(1).max(1);
        // At most 100 since every stage is.
        u8::try_from((total + count / 2) / count).unwrap_or(100)
    }
}
