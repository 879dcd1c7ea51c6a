use crate::error::{BoxError, ClassifiedError, ErrorCategory, ErrorContext};

/// A failure as observed by an operation wrapped in the retry executor.
///
/// Operations return whatever they naturally produce; anything that converts
/// into an `OperationError` can be classified. An already classified error
/// passes through [`classify`] untouched.
#[derive(Debug)]
pub enum OperationError {
    /// Already classified upstream; never re-classified.
    Classified(ClassifiedError),
    /// A raw failure with an explicit category, bypassing message heuristics.
    Categorized {
        category: ErrorCategory,
        source: BoxError,
    },
    /// A raw failure classified from its message.
    Raw(BoxError),
}

impl OperationError {
    pub fn raw(err: impl Into<BoxError>) -> Self {
        Self::Raw(err.into())
    }

    pub fn categorized(category: ErrorCategory, err: impl Into<BoxError>) -> Self {
        Self::Categorized {
            category,
            source: err.into(),
        }
    }
}

impl From<ClassifiedError> for OperationError {
    fn from(err: ClassifiedError) -> Self {
        Self::Classified(err)
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let category = match err.kind() {
            ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => Some(ErrorCategory::Network),
            ErrorKind::OutOfMemory => Some(ErrorCategory::Memory),
            ErrorKind::PermissionDenied => Some(ErrorCategory::Authorization),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => Some(ErrorCategory::Validation),
            _ => None,
        };
        match category {
            Some(category) => Self::categorized(category, err),
            None => Self::raw(err),
        }
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::Raw(message.into())
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::Raw(message.into())
    }
}

/// Ordered message heuristics. The first category whose needle appears in the
/// lowercased message wins.
const HEURISTICS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "etimedout", "deadline exceeded"],
    ),
    (
        ErrorCategory::Memory,
        &["out of memory", "enomem", "heap", "allocation failed", "memory"],
    ),
    (
        ErrorCategory::Database,
        &[
            "database",
            "sql",
            "deadlock",
            "transaction aborted",
            "could not serialize",
            "serialization failure",
            "constraint",
        ],
    ),
    (
        ErrorCategory::Network,
        &[
            "network",
            "econnrefused",
            "econnreset",
            "connection refused",
            "connection reset",
            "socket",
            "dns",
            "fetch failed",
        ],
    ),
    (ErrorCategory::Template, &["template", "handlebars", "placeholder"]),
    (
        ErrorCategory::RenderFailure,
        &["render", "pdf", "browser", "page crashed", "rasteriz"],
    ),
    (
        ErrorCategory::RateLimit,
        &["rate limit", "too many requests", "429"],
    ),
    (
        ErrorCategory::Authentication,
        &["unauthenticated", "unauthorized", "invalid token", "token expired", "authentication"],
    ),
    (
        ErrorCategory::Authorization,
        &["forbidden", "permission denied", "not allowed", "authorization"],
    ),
    (
        ErrorCategory::Validation,
        &["invalid", "validation", "required", "must be", "malformed"],
    ),
];

/// Matches a failure message against the ordered category heuristics.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lowered = message.to_ascii_lowercase();
    HEURISTICS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Normalizes a failure into a [`ClassifiedError`].
///
/// Already classified errors are returned as-is apart from gaining any
/// context keys they did not carry yet. Raw failures keep their original
/// error as the cause.
pub fn classify(err: impl Into<OperationError>, context: &ErrorContext) -> ClassifiedError {
    match err.into() {
        OperationError::Classified(mut classified) => {
            classified.context.merge_missing(context);
            classified
        }
        OperationError::Categorized { category, source } => {
            ClassifiedError::new(category, source.to_string())
                .with_context(context.clone())
                .with_cause(source)
        }
        OperationError::Raw(source) => {
            let message = source.to_string();
            ClassifiedError::new(categorize_message(&message), message)
                .with_context(context.clone())
                .with_cause(source)
        }
    }
}
