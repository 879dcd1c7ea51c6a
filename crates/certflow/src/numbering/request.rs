use crate::config::NumberingConfig;
use crate::error::ClassifiedError;
use crate::numbering::validate_template;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted range for certificate years.
pub const YEAR_RANGE: core::ops::RangeInclusive<i32> = 1900..=9999;

/// A request for the next certificate number of an `(entity, year)` pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberingRequest {
    pub entity_id: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Sequence used when no number was issued yet for the pair. Must be
    /// positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Identifies one logical operation. Repeating a request with the same key
    /// within the cache lifetime returns the number already issued for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Bypass and drop the cached number for this key.
    #[serde(default)]
    pub fresh: bool,
}

/// The resolved, validated parameters of a [`NumberingRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ValidatedRequest {
    pub template: String,
    pub start_number: u64,
}

impl NumberingRequest {
    pub fn new(entity_id: impl Into<String>, year: i32) -> Self {
        Self {
            entity_id: entity_id.into(),
            year,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Validates the request before any store access.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty entity id, a year outside
    /// [`YEAR_RANGE`], a non-positive start number, or a template missing
    /// the year or sequence token.
    pub(crate) fn validate(
        &self,
        config: &NumberingConfig,
    ) -> Result<ValidatedRequest, ClassifiedError> {
        if self.entity_id.trim().is_empty() {
            return Err(ClassifiedError::validation("entityId is required"));
        }
        if !YEAR_RANGE.contains(&self.year) {
            return Err(ClassifiedError::validation(format!(
                "year must be between {} and {}",
                YEAR_RANGE.start(),
                YEAR_RANGE.end()
            ))
            .with_field("year", self.year));
        }
        let start_number = match self.start_number {
            None => config.default_start_number.max(1),
            Some(n) if n > 0 => n.unsigned_abs(),
            Some(n) => {
                return Err(ClassifiedError::validation("startNumber must be positive")
                    .with_field("startNumber", n));
            }
        };
        let template = self
            .format
            .clone()
            .unwrap_or_else(|| config.default_template.clone());
        validate_template(&template)?;

        Ok(ValidatedRequest {
            template,
            start_number,
        })
    }
}

/// A committed certificate number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceAssignment {
    pub certificate_number: String,
    pub year: i32,
    pub sequence: u64,
    pub entity_id: String,
    #[serde(rename = "generatedAt")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "generatedBy")]
    pub issued_by: String,
}
