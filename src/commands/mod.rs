//! Command implementations behind the `kvitt` CLI.

use anyhow::Result;
use std::sync::Arc;

use crate::{
    config::{ClientConfig, ConfigOverrides},
    http::ApiClient,
    runtime::Runtime,
    session::FileSessionProvider,
};

mod feedback;
mod request;
mod session;

pub use feedback::feedback;
pub use request::request;
pub use session::{login, logout};

/// Resolve configuration and build a client backed by the on-disk session.
pub(crate) fn connect<R: Runtime + 'static>(
    runtime: R,
    overrides: &ConfigOverrides,
) -> Result<ApiClient> {
    let config = ClientConfig::resolve(&runtime, overrides)?;
    // Fail on a missing API URL before touching the session file
    config.require_api_url()?;
    let session = FileSessionProvider::from_config(runtime, &config)?;
    ApiClient::new(&config, Arc::new(session))
}
