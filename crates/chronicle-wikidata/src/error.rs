//! Query service error classification.

use chronicle_core::Error;

/// Failure categories of the query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparqlErrorCode {
    /// 429 Too Many Requests.
    RateLimited,
    /// 503 or 504 from the service or its gateway.
    Unavailable,
    /// Other 5xx.
    ServerError,
    /// 400, usually a malformed query.
    BadQuery,
    /// Other 4xx, or a non-error status that is not 2xx.
    Rejected,
}

impl SparqlErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            503 | 504 => Self::Unavailable,
            500..=599 => Self::ServerError,
            400 => Self::BadQuery,
            _ => Self::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable | Self::ServerError
        )
    }
}

/// Map a failed response to a chronicle error.
pub fn to_chronicle_error(code: SparqlErrorCode, status: u16, message: &str) -> Error {
    let detail = format!("HTTP {}: {}", status, message.trim());
    if code.is_retryable() {
        Error::TransientExternal(detail)
    } else {
        Error::PermanentExternal(detail)
    }
}
