//! Session persisted as JSON on disk, refreshed through the auth service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{Session, SessionProvider, mask_token};
use crate::config::ClientConfig;
use crate::runtime::Runtime;

const SESSION_FILE_MODE: u32 = 0o600;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token grant returned by the auth service's refresh endpoint.
#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

pub struct FileSessionProvider<R: Runtime> {
    runtime: R,
    path: PathBuf,
    auth_url: Option<String>,
    auth_api_key: Option<String>,
    client: Client,
    // One refresh-and-write at a time. A waiting refresh re-reads the stored
    // session and exchanges whatever refresh token it finds there.
    refresh_lock: Mutex<()>,
}

impl<R: Runtime> FileSessionProvider<R> {
    pub fn new(runtime: R, path: PathBuf, auth_url: Option<String>, client: Client) -> Self {
        Self {
            runtime,
            path,
            auth_url,
            auth_api_key: None,
            client,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_auth_api_key(mut self, key: Option<String>) -> Self {
        self.auth_api_key = key;
        self
    }

    pub fn from_config(runtime: R, config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build auth HTTP client")?;

        Ok(Self::new(
            runtime,
            config.session_file.clone(),
            config.auth_url.clone(),
            client,
        )
        .with_auth_api_key(config.auth_api_key.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored session. `Ok(None)` when signed out.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.runtime.exists(&self.path) {
            return Ok(None);
        }
        let content = self.runtime.read_to_string(&self.path)?;
        let session: Session = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    /// Store a session, readable only by the current user.
    ///
    /// Written to a sibling `.tmp` file that is restricted to 0600 before the
    /// tokens go in, then renamed over the session file.
    #[tracing::instrument(skip(self, session))]
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !self.runtime.exists(parent) {
                self.runtime.create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(session)?;

        let tmp = self.tmp_path();
        self.runtime.write(&tmp, b"")?;
        self.runtime.set_permissions(&tmp, SESSION_FILE_MODE)?;
        self.runtime.write(&tmp, json.as_bytes())?;
        self.runtime.rename(&tmp, &self.path)?;

        debug!(
            "Saved session {} to {}",
            mask_token(&session.access_token),
            self.path.display()
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session> {
        let auth_url = self.auth_url.as_deref().with_context(|| {
            format!(
                "No auth URL configured. Set {} to enable session refresh.",
                crate::config::AUTH_URL_ENV
            )
        })?;
        let url = format!("{}/token", auth_url.trim_end_matches('/'));
        debug!("Refreshing session at {}...", url);

        let mut request = self
            .client
            .post(&url)
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshRequest { refresh_token });
        if let Some(key) = &self.auth_api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send session refresh request")?
            .error_for_status()
            .context("Auth service rejected the session refresh")?;

        let grant: TokenGrant = response
            .json()
            .await
            .context("Failed to parse session refresh response")?;

        let mut session = Session::new(grant.access_token);
        // Some auth services rotate the refresh token, others keep it.
        session.refresh_token = grant
            .refresh_token
            .or_else(|| Some(refresh_token.to_string()));
        if let Some(expires_in) = grant.expires_in {
            session = session.expiring_in(expires_in);
        }
        Ok(session)
    }
}

#[async_trait]
impl<R: Runtime> SessionProvider for FileSessionProvider<R> {
    #[tracing::instrument(skip(self))]
    async fn current(&self) -> Option<Session> {
        match self.load() {
            Ok(Some(session)) => {
                if session.is_expired() {
                    debug!("Stored session has expired; the server will ask for a refresh");
                }
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable session: {:#}", e);
                None
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn refresh(&self) -> Result<Session> {
        let _guard = self.refresh_lock.lock().await;

        let stored = self.load()?.context("Not signed in")?;
        let refresh_token = stored
            .refresh_token
            .as_deref()
            .context("Session cannot be refreshed: no refresh token stored")?;

        let session = self.exchange_refresh_token(refresh_token).await?;
        self.save(&session)?;
        info!("Session refreshed");
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self) {
        if !self.runtime.exists(&self.path) {
            return;
        }
        match self.runtime.remove_file(&self.path) {
            Ok(()) => info!("Signed out, removed {}", self.path.display()),
            Err(e) => warn!("Failed to remove session file: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::Sequence;
    use mockito::{Matcher, Server};
    use tempfile::tempdir;

    fn provider_at(path: PathBuf, auth_url: Option<String>) -> FileSessionProvider<RealRuntime> {
        FileSessionProvider::new(RealRuntime, path, auth_url, Client::new())
    }

    #[tokio::test]
    async fn test_save_load_and_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/session.json");
        let provider = provider_at(path.clone(), None);

        assert!(provider.current().await.is_none());

        let session = Session::new("access-1").with_refresh_token("refresh-1");
        provider.save(&session).unwrap();
        assert!(path.exists());
        assert_eq!(provider.current().await, Some(session));

        provider.clear().await;
        assert!(!path.exists());
        assert!(provider.current().await.is_none());

        // Clearing twice is harmless
        provider.clear().await;
    }

    #[tokio::test]
    async fn test_corrupt_session_file_reads_as_signed_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let provider = provider_at(path, None);
        assert!(provider.load().is_err());
        assert!(provider.current().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_exchanges_and_persists_tokens() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .match_header("apikey", "anon-key")
            .match_body(Matcher::Json(serde_json::json!({"refresh_token": "refresh-1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token": "access-2", "refresh_token": "refresh-2", "expires_in": 3600, "token_type": "bearer"}"#,
            )
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let provider = provider_at(path.clone(), Some(format!("{}/auth/v1/", server.url())))
            .with_auth_api_key(Some("anon-key".to_string()));
        provider
            .save(&Session::new("access-1").with_refresh_token("refresh-1"))
            .unwrap();

        let session = provider.refresh().await.unwrap();

        mock.assert_async().await;
        assert_eq!(session.access_token, "access-2");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
        assert!(session.expires_at.is_some());
        assert_eq!(provider.load().unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "access-2"}"#)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let provider = provider_at(dir.path().join("session.json"), Some(server.url()));
        provider
            .save(&Session::new("access-1").with_refresh_token("refresh-1"))
            .unwrap();

        let session = provider.refresh().await.unwrap();
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(session.expires_at, None);
    }

    #[tokio::test]
    async fn test_refresh_rejected_keeps_old_session() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let provider = provider_at(dir.path().join("session.json"), Some(server.url()));
        let original = Session::new("access-1").with_refresh_token("refresh-1");
        provider.save(&original).unwrap();

        assert!(provider.refresh().await.is_err());
        assert_eq!(provider.load().unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_refresh_without_prerequisites_fails() {
        let dir = tempdir().unwrap();

        // Not signed in
        let provider = provider_at(dir.path().join("a.json"), Some("http://unused".into()));
        let err = provider.refresh().await.unwrap_err();
        assert!(err.to_string().contains("Not signed in"));

        // No refresh token
        let provider = provider_at(dir.path().join("b.json"), Some("http://unused".into()));
        provider.save(&Session::new("access-1")).unwrap();
        let err = provider.refresh().await.unwrap_err();
        assert!(err.to_string().contains("no refresh token"));

        // No auth URL
        let provider = provider_at(dir.path().join("c.json"), None);
        provider
            .save(&Session::new("access-1").with_refresh_token("refresh-1"))
            .unwrap();
        let err = provider.refresh().await.unwrap_err();
        assert!(err.to_string().contains("KVITT_AUTH_URL"));
    }

    #[test]
    fn test_save_restricts_permissions() {
        let path = PathBuf::from("/home/user/.config/kvitt/session.json");
        let tmp = PathBuf::from("/home/user/.config/kvitt/session.json.tmp");
        let mut seq = Sequence::new();
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime.expect_create_dir_all().never();

        let expected = tmp.clone();
        runtime
            .expect_write()
            .withf(move |p, contents| p == expected && contents.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let expected = tmp.clone();
        runtime
            .expect_set_permissions()
            .withf(move |p, mode| p == expected && *mode == 0o600)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let expected = tmp.clone();
        runtime
            .expect_write()
            .withf(move |p, contents| {
                p == expected && std::str::from_utf8(contents).unwrap().contains("access-1")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let (from, to) = (tmp.clone(), path.clone());
        runtime
            .expect_rename()
            .withf(move |f, t| f == from && t == to)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let provider = FileSessionProvider::new(runtime, path, None, Client::new());
        provider.save(&Session::new("access-1")).unwrap();
    }

    #[test]
    fn test_failed_save_leaves_session_file_alone() {
        let path = PathBuf::from("/home/user/.config/kvitt/session.json");
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime.expect_write().returning(|_, _| Ok(()));
        runtime
            .expect_set_permissions()
            .returning(|_, _| Err(anyhow::anyhow!("read-only file system")));
        runtime.expect_rename().never();

        let provider = FileSessionProvider::new(runtime, path, None, Client::new());
        assert!(provider.save(&Session::new("access-1")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("kvitt").join("session.json");
        let provider = FileSessionProvider::new(RealRuntime, path.clone(), None, Client::new());

        provider.save(&Session::new("access-1")).unwrap();
        provider.save(&Session::new("access-2")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!dir.path().join("kvitt").join("session.json.tmp").exists());
        assert_eq!(
            provider.load().unwrap().unwrap().access_token,
            "access-2"
        );
    }
}
