//! Error types for submit_agent.

use std::fmt;

/// Agent error types.
#[derive(Debug)]
pub enum AgentError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// JSON serialization/deserialization error.
    Json(serde_json::Error),
    /// IO error (evidence and audit files).
    Io(std::io::Error),
    /// Missing required field in response.
    MissingField(&'static str),
    /// Invalid field type in response.
    InvalidField(&'static str),
    /// Remote API error.
    Remote(String),
    /// Feature not enabled or configured.
    NotConfigured(&'static str),
    /// Decision service authentication failed.
    Auth(String),
    /// Browser operation failed; the session is still usable.
    Browser(String),
    /// Browser failure that ends the attempt.
    FatalBrowser(String),
    /// CAPTCHA solver error.
    Solver(String),
    /// Job queue error worth retrying.
    Queue(String),
    /// A remote endpoint refused the request; retrying the same request
    /// will not help.
    Rejected(String),
    /// Rate limit exceeded.
    RateLimited,
    /// Timeout.
    Timeout,
}

impl AgentError {
    /// Whether a call site should retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited | Self::Timeout | Self::Remote(_) => true,
            Self::Queue(_) => true,
            _ => false,
        }
    }

    /// Whether this error ends the current attempt.
    pub fn is_fatal_browser(&self) -> bool {
        matches!(self, Self::FatalBrowser(_))
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::MissingField(field) => write!(f, "Missing field: {}", field),
            Self::InvalidField(field) => write!(f, "Invalid field: {}", field),
            Self::Remote(msg) => write!(f, "Remote error: {}", msg),
            Self::NotConfigured(what) => write!(f, "Not configured: {}", what),
            Self::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            Self::Browser(msg) => write!(f, "Browser error: {}", msg),
            Self::FatalBrowser(msg) => write!(f, "Fatal browser error: {}", msg),
            Self::Solver(msg) => write!(f, "Solver error: {}", msg),
            Self::Queue(msg) => write!(f, "Queue error: {}", msg),
            Self::Rejected(msg) => write!(f, "Request rejected: {}", msg),
            Self::RateLimited => write!(f, "Rate limit exceeded"),
            Self::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e)
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
