//! Maps raw transport and HTTP failures to display-ready errors.
//!
//! Classification is an ordered rule table evaluated top to bottom; the first
//! matching rule wins. Transport conditions come first (a timeout is more
//! specific than a generic network failure), then error codes carried in the
//! response body, then individual status codes, then the 5xx bucket.

use reqwest::StatusCode;
use serde_json::Value;
use std::error::Error as _;

use super::error::{ErrorKind, FriendlyError};

/// Transport-level condition observed when no usable response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    Timeout,
    Connect,
    Cancelled,
    Other,
}

/// Everything the classifier looks at. Built once per failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFailure {
    pub status: Option<u16>,
    pub body: Option<String>,
    pub transport: Option<TransportErrorCode>,
    /// Transport error message including its source chain.
    pub message: Option<String>,
    /// Value of the `x-request-id` response header.
    pub request_id: Option<String>,
}

impl RawFailure {
    pub fn from_status(status: u16, body: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            status: Some(status),
            body: Some(body.into()),
            request_id,
            ..Default::default()
        }
    }

    pub fn from_transport(error: &reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            TransportErrorCode::Timeout
        } else if error.is_connect() {
            TransportErrorCode::Connect
        } else {
            TransportErrorCode::Other
        };

        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            status: error.status().map(|s| s.as_u16()),
            transport: Some(code),
            message: Some(message),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            transport: Some(TransportErrorCode::Cancelled),
            ..Default::default()
        }
    }

    fn message_mentions(&self, needles: &[&str]) -> bool {
        self.message.as_deref().is_some_and(|m| {
            let m = m.to_lowercase();
            needles.iter().any(|n| m.contains(n))
        })
    }

    fn status_is(&self, status: StatusCode) -> bool {
        self.status == Some(status.as_u16())
    }
}

/// Error envelope the backend uses for non-2xx responses.
///
/// Read field by field from a `Value` so one oddly typed field (a numeric
/// `code`, say) does not discard the others.
#[derive(Debug, Default)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

impl ErrorBody {
    fn parse(raw: &RawFailure) -> Self {
        let Some(value) = raw
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Value>(b).ok())
        else {
            return Self::default();
        };

        Self {
            code: scalar(&value, "code").or_else(|| scalar(&value, "error_code")),
            message: text(&value, "message").or_else(|| text(&value, "error")),
            request_id: scalar(&value, "request_id"),
        }
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// A string or number field, as a string.
fn scalar(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

const VALIDATION_CODES: &[&str] = &["VALIDATION_ERROR", "INVALID_INPUT"];

struct Rule {
    matches: fn(&RawFailure, &ErrorBody) -> bool,
    kind: ErrorKind,
    title: &'static str,
    detail: &'static str,
    /// Prefer the server's message over `detail` when the body has one.
    server_detail: bool,
}

const SIGNED_OUT: Rule = Rule {
    matches: |raw, _| raw.status_is(StatusCode::UNAUTHORIZED),
    kind: ErrorKind::Unauthorized,
    title: "Signed out",
    detail: "Your session has expired. Please sign in again.",
    server_detail: false,
};

const RULES: &[Rule] = &[
    Rule {
        matches: |raw, _| {
            raw.transport == Some(TransportErrorCode::Timeout)
                || raw.message_mentions(&["timed out", "timeout"])
        },
        kind: ErrorKind::Timeout,
        title: "Request timed out",
        detail: "The server took too long to respond. Please try again.",
        server_detail: false,
    },
    Rule {
        matches: |raw, _| raw.transport == Some(TransportErrorCode::Cancelled),
        kind: ErrorKind::Cancelled,
        title: "Request cancelled",
        detail: "The request was cancelled before it finished.",
        server_detail: false,
    },
    Rule {
        matches: |raw, _| {
            raw.transport == Some(TransportErrorCode::Connect)
                || (raw.status.is_none()
                    && raw.message_mentions(&["connection", "dns", "network", "unreachable"]))
        },
        kind: ErrorKind::NetworkError,
        title: "No connection",
        detail: "Could not reach the server. Check your internet connection and try again.",
        server_detail: false,
    },
    Rule {
        matches: |_, body| body.code().is_some_and(|c| VALIDATION_CODES.contains(&c)),
        kind: ErrorKind::ValidationError,
        title: "Check your input",
        detail: "Some of the information you entered is not valid.",
        server_detail: true,
    },
    SIGNED_OUT,
    Rule {
        matches: |raw, _| raw.status_is(StatusCode::FORBIDDEN),
        kind: ErrorKind::Forbidden,
        title: "Not allowed",
        detail: "You don't have permission to do that.",
        server_detail: false,
    },
    Rule {
        matches: |raw, _| raw.status_is(StatusCode::NOT_FOUND),
        kind: ErrorKind::NotFound,
        title: "Not found",
        detail: "That item no longer exists.",
        server_detail: false,
    },
    Rule {
        matches: |raw, _| raw.status_is(StatusCode::CONFLICT),
        kind: ErrorKind::Conflict,
        title: "Conflict",
        detail: "Someone else changed this in the meantime. Refresh and try again.",
        server_detail: false,
    },
    Rule {
        matches: |raw, _| raw.status_is(StatusCode::UNPROCESSABLE_ENTITY),
        kind: ErrorKind::ValidationError,
        title: "Check your input",
        detail: "Some of the information you entered is not valid.",
        server_detail: true,
    },
    Rule {
        matches: |raw, _| raw.status.is_some_and(|s| (500..600).contains(&s)),
        kind: ErrorKind::ServerError,
        title: "Server error",
        detail: "Something went wrong on our side. Please try again in a moment.",
        server_detail: false,
    },
];

static FALLBACK: Rule = Rule {
    matches: |_, _| true,
    kind: ErrorKind::Unknown,
    title: "Something went wrong",
    detail: "An unexpected error occurred. Please try again.",
    server_detail: false,
};

/// Classify a raw failure. Pure: equal inputs give equal outputs.
pub fn classify(raw: &RawFailure) -> FriendlyError {
    let body = ErrorBody::parse(raw);
    let rule = RULES
        .iter()
        .find(|rule| (rule.matches)(raw, &body))
        .unwrap_or(&FALLBACK);
    render(rule, raw, &body)
}

/// The `Unauthorized` error for a rejected request whose session could not be
/// refreshed, whatever the response body says. Keeps the correlation id.
pub fn signed_out(raw: &RawFailure) -> FriendlyError {
    render(&SIGNED_OUT, raw, &ErrorBody::parse(raw))
}

fn render(rule: &Rule, raw: &RawFailure, body: &ErrorBody) -> FriendlyError {
    let detail = match body.message() {
        Some(message) if rule.server_detail => message.to_string(),
        _ => rule.detail.to_string(),
    };

    let request_id = raw.request_id.as_deref().or(body.request_id.as_deref());

    FriendlyError::new(rule.kind, rule.title, detail).with_request_id(request_id)
}
