use crate::error::{ErrorCategory, Severity};
use crate::ids::correlation_id;
use chrono::{DateTime, Utc};
use core::fmt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A boxed, thread-safe error used as the cause of a [`ClassifiedError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured key/value context attached to a classified failure.
///
/// The `operation` key names the unit of work that failed; other keys are
/// free-form (transaction id, attempt number, entity id, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorContext(BTreeMap<String, Value>);

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("operation".to_string(), Value::String(operation.into()));
        Self(map)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn operation(&self) -> Option<&str> {
        self.0.get("operation").and_then(Value::as_str)
    }

    /// Copies every key of `other` that is not already present.
    pub fn merge_missing(&mut self, other: &Self) {
        for (k, v) in &other.0 {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A normalized failure record.
///
/// Built once, at the boundary where a raw failure is first observed, and
/// never re-classified downstream: the retry executor and the pipeline pass a
/// `ClassifiedError` through untouched and act on its own
/// [`is_retryable`](Self::is_retryable) flag.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub code: String,
    pub context: ErrorContext,
    pub is_retryable: bool,
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(skip)]
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    #[serde(skip)]
    reported: bool,
}

impl ClassifiedError {
    /// Creates an error with the category's default severity, retryability,
    /// code and user message.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        Self {
            message: message.into(),
            category,
            severity: category.severity(),
            code: category.code().to_string(),
            context: ErrorContext::default(),
            is_retryable: category.is_retryable(),
            user_message: category.user_message().to_string(),
            correlation_id: correlation_id(timestamp.timestamp_millis()),
            timestamp,
            cause: None,
            reported: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.is_retryable = retryable;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    /// The original failure this error was classified from, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Suggested client back-off, present only when the error is retryable.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if self.is_retryable {
            self.category.retry_after_secs().or(Some(5))
        } else {
            None
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl ClassifiedError {
    /// Logs the error via [`report`] unless an earlier boundary already did.
    ///
    /// Errors that travel through several layers (a service, then the retry
    /// executor, then the pipeline) are logged and alerted on once.
    pub fn report_once(&mut self) {
        if !self.reported {
            report(self);
            self.reported = true;
        }
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }
}

/// Logs a classified error with its full context.
///
/// Prefer [`ClassifiedError::report_once`] where the error may be reported
/// again further up.
///
/// `High` and `Critical` failures additionally emit a line on the
/// `certflow::alert` target so that monitoring can subscribe to it alone.
pub fn report(_err: &ClassifiedError) {
    #[cfg(feature = "tracing")]
    {
        let context = serde_json::to_string(&_err.context).unwrap_or_default();
        let cause = _err.cause().map(ToString::to_string);
        match _err.severity {
            Severity::Low => tracing::info!(
                correlation_id = %_err.correlation_id,
                category = %_err.category,
                code = %_err.code,
                retryable = _err.is_retryable,
                context = %context,
                cause = ?cause,
                "{}",
                _err.message
            ),
            Severity::Medium => tracing::warn!(
                correlation_id = %_err.correlation_id,
                category = %_err.category,
                code = %_err.code,
                retryable = _err.is_retryable,
                context = %context,
                cause = ?cause,
                "{}",
                _err.message
            ),
            Severity::High | Severity::Critical => tracing::error!(
                correlation_id = %_err.correlation_id,
                category = %_err.category,
                code = %_err.code,
                retryable = _err.is_retryable,
                context = %context,
                cause = ?cause,
                "{}",
                _err.message
            ),
        }

        if _err.severity.is_alerting() {
            tracing::error!(
                target: "certflow::alert",
                correlation_id = %_err.correlation_id,
                severity = %_err.severity,
                category = %_err.category,
                code = %_err.code,
                "monitoring alert: {}",
                _err.message
            );
        }
    }
}
