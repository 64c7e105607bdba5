//! Authenticated HTTP client and failure classification.

mod classify;
mod client;
mod error;

pub use classify::{RawFailure, TransportErrorCode, classify, signed_out};
pub use client::{ApiClient, OutboundRequest, REQUEST_ID_HEADER};
pub use error::{ApiError, ErrorKind, FriendlyError, REQUEST_ID_PREFIX_LEN};
