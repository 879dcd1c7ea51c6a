use chrono::{DateTime, Utc};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// The ordered stages of one certificate generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    TemplateLoading,
    DataValidation,
    PdfGeneration,
    FilePreparation,
    DownloadReady,
    Completed,
}

impl Stage {
    pub const ALL: [Self; 7] = [
        Self::Initializing,
        Self::TemplateLoading,
        Self::DataValidation,
        Self::PdfGeneration,
        Self::FilePreparation,
        Self::DownloadReady,
        Self::Completed,
    ];

    /// Position in [`Stage::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::TemplateLoading => "template_loading",
            Self::DataValidation => "data_validation",
            Self::PdfGeneration => "pdf_generation",
            Self::FilePreparation => "file_preparation",
            Self::DownloadReady => "download_ready",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage {0:?}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Progress record of one stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub stage: Stage,
    pub status: StageStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageProgress {
    pub fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            progress: 0,
            message: String::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Marks the stage started if it was not already.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if self.status == StageStatus::Pending {
            self.status = StageStatus::InProgress;
        }
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>) {
        self.touch(now);
        self.progress = 100;
        self.status = StageStatus::Completed;
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|at| u64::try_from((now - at).num_milliseconds()).unwrap_or_default());
    }
}

/// Clamps a reported percentage to `0..=100`. NaN counts as zero.
pub fn clamp_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    // In range after the clamp, so the cast is exact.
    percent.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_round_trip_their_wire_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
            assert_eq!(
                serde_json::to_value(stage).unwrap(),
                serde_json::json!(stage.as_str())
            );
        }
        assert!("rendering".parse::<Stage>().is_err());
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Initializing < Stage::DataValidation);
        assert_eq!(Stage::DownloadReady.index(), 5);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(clamp_percent(-5.0), 0);
        assert_eq!(clamp_percent(150.0), 100);
        assert_eq!(clamp_percent(33.4), 33);
        assert_eq!(clamp_percent(f64::NAN), 0);
    }
}
