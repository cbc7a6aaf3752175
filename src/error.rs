use std::fmt;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "request.prompt", "config.cache_ttl_ms")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "fingerprinter", "orchestrator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage at which a deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// The provider call (including retries and backoff) ran past the deadline.
    Provider,
    /// The caller gave up while joined to another caller's in-flight request.
    DedupWait,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::Provider => f.write_str("provider call"),
            TimeoutStage::DedupWait => f.write_str("dedup wait"),
        }
    }
}

/// Flat discriminant of [`Error`], for callers that map errors onto their own
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    SessionNotFound,
    ProviderFailure,
    Timeout,
    StorageFailure,
    Configuration,
}

/// Unified error type for the assistant core.
///
/// `Clone` is required: a single provider failure is delivered verbatim to
/// every caller joined on the same in-flight request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid request: {message}{}", format_context(.context))]
    InvalidRequest {
        message: String,
        context: ErrorContext,
    },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Provider failure{}: {message}", format_status(.status))]
    ProviderFailure {
        message: String,
        status: Option<u16>,
        transient: bool,
    },

    #[error("Timeout during {stage} after {elapsed_ms}ms")]
    Timeout { stage: TimeoutStage, elapsed_ms: u64 },

    #[error("Storage failure: {message}")]
    StorageFailure { message: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new validation error with structured context
    pub fn invalid_request_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Error::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Upstream failure that is worth retrying (connection reset, 5xx, 429).
    pub fn transient(msg: impl Into<String>, status: Option<u16>) -> Self {
        Error::ProviderFailure {
            message: msg.into(),
            status,
            transient: true,
        }
    }

    /// Upstream failure that will fail the same way on every attempt.
    pub fn permanent(msg: impl Into<String>, status: Option<u16>) -> Self {
        Error::ProviderFailure {
            message: msg.into(),
            status,
            transient: false,
        }
    }

    pub fn timeout(stage: TimeoutStage, elapsed: std::time::Duration) -> Self {
        Error::Timeout {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::StorageFailure {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Error::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Error::ProviderFailure { .. } => ErrorKind::ProviderFailure,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::StorageFailure { .. } => ErrorKind::StorageFailure,
            Error::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether a retry of the same provider call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ProviderFailure {
                transient: true,
                ..
            }
        )
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidRequest { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
