//! Client for the Kvitt game-night backend.
//!
//! [`http::ApiClient`] attaches the signed-in user's bearer token to each
//! request, recovers from an expired token with a single session refresh and
//! retry, and turns every other failure into a display-ready
//! [`http::FriendlyError`].

pub mod commands;
pub mod config;
pub mod feedback;
pub mod http;
pub mod runtime;
pub mod session;

/// Version string derived from git at build time.
pub const VERSION: &str = env!("KVITT_VERSION");

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("kvitt/", env!("KVITT_VERSION"));
