//! Error types surfaced to callers of the API client.

use std::fmt;

/// Length of the correlation id prefix shown to users.
pub const REQUEST_ID_PREFIX_LEN: usize = 8;

/// Category of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect, send or receive exceeded the configured duration
    Timeout,
    /// HTTP 401 that could not be recovered by a session refresh
    Unauthorized,
    /// HTTP 403
    Forbidden,
    /// HTTP 404
    NotFound,
    /// HTTP 409
    Conflict,
    /// HTTP 422, a validation error code in the body, or a local check
    ValidationError,
    /// HTTP 5xx
    ServerError,
    /// No response was received
    NetworkError,
    /// The caller abandoned the request
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Stable machine-readable code attached to a [`FriendlyError`].
    pub fn code(self) -> Option<&'static str> {
        match self {
            ErrorKind::Timeout => Some("TIMEOUT"),
            ErrorKind::Unauthorized => Some("UNAUTHORIZED"),
            ErrorKind::Forbidden => Some("FORBIDDEN"),
            ErrorKind::NotFound => Some("NOT_FOUND"),
            ErrorKind::Conflict => Some("CONFLICT"),
            ErrorKind::ValidationError => Some("VALIDATION_ERROR"),
            ErrorKind::ServerError => Some("SERVER_ERROR"),
            ErrorKind::NetworkError => Some("NETWORK_ERROR"),
            ErrorKind::Cancelled => Some("CANCELLED"),
            ErrorKind::Unknown => None,
        }
    }

    /// Whether a caller may reasonably try the same request again later.
    /// The client itself never does.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::ServerError | ErrorKind::NetworkError
        )
    }
}

/// Display-ready description of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendlyError {
    pub kind: ErrorKind,
    pub title: String,
    pub detail: String,
    pub code: Option<String>,
    /// Correlation id for support lookups, already truncated.
    pub request_id: Option<String>,
}

impl FriendlyError {
    pub fn new(kind: ErrorKind, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            detail: detail.into(),
            code: kind.code().map(str::to_string),
            request_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a correlation id, keeping only its first few characters.
    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| id.chars().take(REQUEST_ID_PREFIX_LEN).collect());
        self
    }

    /// The detail line with the correlation id appended, if there is one.
    pub fn display_detail(&self) -> String {
        match &self.request_id {
            Some(id) => format!("{} (ref: {})", self.detail, id),
            None => self.detail.clone(),
        }
    }
}

impl fmt::Display for FriendlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.display_detail())
    }
}

/// Error returned by [`crate::http::ApiClient`] operations.
#[derive(Debug)]
pub enum ApiError {
    /// A transport or HTTP failure, classified at the client boundary
    Classified(FriendlyError),
    /// Rejected before anything was sent
    InvalidInput(FriendlyError),
    /// The response parser failed on a successful response
    Parse(anyhow::Error),
    /// The request could not be built (bad path, unusable token)
    InvalidRequest(String),
}

impl ApiError {
    pub fn kind(&self) -> Option<ErrorKind> {
        self.friendly().map(|e| e.kind)
    }

    pub fn friendly(&self) -> Option<&FriendlyError> {
        match self {
            ApiError::Classified(e) | ApiError::InvalidInput(e) => Some(e),
            ApiError::Parse(_) | ApiError::InvalidRequest(_) => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Classified(e) | ApiError::InvalidInput(e) => write!(f, "{}", e),
            ApiError::Parse(e) => write!(f, "Unexpected response from server: {:#}", e),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Parse(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_friendly_error_display_without_request_id() {
        let err = FriendlyError::new(ErrorKind::NotFound, "Not found", "That item no longer exists.");
        assert_eq!(err.to_string(), "Not found: That item no longer exists.");
        assert_eq!(err.code.as_deref(), Some("NOT_FOUND"));
    }

    #[test]
    fn test_friendly_error_request_id_is_truncated() {
        let err = FriendlyError::new(ErrorKind::ServerError, "Server error", "Try again.")
            .with_request_id(Some("3f9a2c71-5b8e-4d0a-9c1e-7f6b5a4d3c2b"));

        assert_eq!(err.request_id.as_deref(), Some("3f9a2c71"));
        assert_eq!(err.display_detail(), "Try again. (ref: 3f9a2c71)");
    }

    #[test]
    fn test_friendly_error_blank_request_id_is_ignored() {
        let err = FriendlyError::new(ErrorKind::Unknown, "Oops", "Something broke.")
            .with_request_id(Some("   "));
        assert_eq!(err.request_id, None);
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_api_error_kind() {
        let err = ApiError::Classified(FriendlyError::new(ErrorKind::Conflict, "Conflict", "x"));
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));

        let err = ApiError::Parse(anyhow::anyhow!("bad json"));
        assert_eq!(err.kind(), None);
        assert!(err.to_string().contains("bad json"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::ServerError.is_transient());
        assert!(ErrorKind::NetworkError.is_transient());
        assert!(!ErrorKind::Unauthorized.is_transient());
        assert!(!ErrorKind::ValidationError.is_transient());
    }
}
