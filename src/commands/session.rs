use anyhow::Result;

use crate::{
    config::{ClientConfig, ConfigOverrides},
    runtime::Runtime,
    session::{FileSessionProvider, Session, SessionProvider},
};

/// Store a session obtained from the auth service.
#[tracing::instrument(skip(runtime, overrides, access_token, refresh_token))]
pub async fn login<R: Runtime + 'static>(
    runtime: R,
    overrides: &ConfigOverrides,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: Option<u64>,
) -> Result<()> {
    let config = ClientConfig::resolve(&runtime, overrides)?;
    let provider = FileSessionProvider::from_config(runtime, &config)?;

    let mut session = Session::new(access_token);
    if let Some(refresh_token) = refresh_token {
        session = session.with_refresh_token(refresh_token);
    }
    if let Some(expires_in) = expires_in {
        session = session.expiring_in(expires_in);
    }

    provider.save(&session)?;
    println!("Signed in. Session stored at {}", provider.path().display());
    Ok(())
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn logout<R: Runtime + 'static>(runtime: R, overrides: &ConfigOverrides) -> Result<()> {
    let config = ClientConfig::resolve(&runtime, overrides)?;
    let provider = FileSessionProvider::from_config(runtime, &config)?;
    provider.clear().await;
    println!("Signed out.");
    Ok(())
}
