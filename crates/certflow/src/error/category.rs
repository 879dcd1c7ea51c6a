use core::fmt;
use serde::{Deserialize, Serialize};

/// The failure taxonomy shared by the numbering service, the retry executor,
/// and the generation pipeline.
///
/// Every category carries a fixed `(severity, retryable)` pair. Categories
/// that indicate a caller or data problem are never retried; categories that
/// indicate a transient condition are. [`ErrorCategory::Unknown`] fails
/// closed: it is critical and not retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Validation,
    System,
    Network,
    Authentication,
    Authorization,
    RateLimit,
    Timeout,
    Memory,
    Database,
    Template,
    RenderFailure,
    Unknown,
}

/// How loudly a classified failure should be reported.
///
/// `High` and `Critical` failures additionally emit a monitoring alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Returns `true` for severities that raise a monitoring alert.
    pub const fn is_alerting(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl ErrorCategory {
    pub const ALL: [Self; 12] = [
        Self::Validation,
        Self::System,
        Self::Network,
        Self::Authentication,
        Self::Authorization,
        Self::RateLimit,
        Self::Timeout,
        Self::Memory,
        Self::Database,
        Self::Template,
        Self::RenderFailure,
        Self::Unknown,
    ];

    pub const fn severity(self) -> Severity {
        match self {
            Self::Validation | Self::RateLimit => Severity::Low,
            Self::Network
            | Self::Authentication
            | Self::Authorization
            | Self::Timeout
            | Self::Template => Severity::Medium,
            Self::System | Self::Database | Self::RenderFailure => Severity::High,
            Self::Memory | Self::Unknown => Severity::Critical,
        }
    }

    pub const fn is_retryable(self) -> bool {
        match self {
            Self::System
            | Self::Network
            | Self::RateLimit
            | Self::Timeout
            | Self::Memory
            | Self::Database
            | Self::RenderFailure => true,
            Self::Validation
            | Self::Authentication
            | Self::Authorization
            | Self::Template
            | Self::Unknown => false,
        }
    }

    /// The default machine-readable error code for this category.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::System => "SYSTEM_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::RateLimit => "RATE_LIMIT_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Memory => "MEMORY_ERROR",
            Self::Database => "DATABASE_ERROR",
            Self::Template => "TEMPLATE_ERROR",
            Self::RenderFailure => "RENDER_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// The fixed human-readable message shown to callers for this category.
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Validation => "The request contains invalid data. Please check your input and try again.",
            Self::System => "A system error occurred. Please try again shortly.",
            Self::Network => "A network problem interrupted the request. Please try again.",
            Self::Authentication => "Your session could not be verified. Please sign in again.",
            Self::Authorization => "You do not have permission to perform this action.",
            Self::RateLimit => "Too many requests. Please wait before trying again.",
            Self::Timeout => "The operation took too long to complete. Please try again.",
            Self::Memory => "The server is temporarily out of resources. Please try again later.",
            Self::Database => "A data storage problem occurred. Please try again.",
            Self::Template => "The certificate template could not be processed. Please contact support.",
            Self::RenderFailure => "The certificate could not be rendered. Please try again.",
            Self::Unknown => "An unexpected error occurred. Please contact support if it persists.",
        }
    }

    /// Suggested client back-off in seconds, only for retryable categories.
    pub const fn retry_after_secs(self) -> Option<u64> {
        if !self.is_retryable() {
            return None;
        }
        Some(match self {
            Self::RateLimit => 60,
            Self::Timeout => 30,
            Self::Network => 10,
            _ => 5,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::System => "system",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rateLimit",
            Self::Timeout => "timeout",
            Self::Memory => "memory",
            Self::Database => "database",
            Self::Template => "template",
            Self::RenderFailure => "renderFailure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}
