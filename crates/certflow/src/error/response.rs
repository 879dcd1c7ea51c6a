use crate::error::{ClassifiedError, ErrorCategory, ErrorContext};
use serde::Serialize;

/// Controls whether technical details reach callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

/// The caller-facing rendering of a terminal [`ClassifiedError`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub error_category: ErrorCategory,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Technical detail, only attached outside production.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub original_message: String,
    pub context: ErrorContext,
    pub correlation_id: String,
}

impl ErrorResponse {
    pub fn from_error(err: &ClassifiedError, env: Environment) -> Self {
        let details = match env {
            Environment::Production => None,
            Environment::Development => Some(ErrorDetails {
                original_message: err.message.clone(),
                context: err.context.clone(),
                correlation_id: err.correlation_id.clone(),
            }),
        };
        Self {
            success: false,
            error: err.user_message.clone(),
            error_code: err.code.clone(),
            error_category: err.category,
            retryable: err.is_retryable,
            retry_after: err.retry_after_secs(),
            details,
        }
    }
}
