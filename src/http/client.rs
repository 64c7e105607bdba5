//! HTTP client that authenticates requests with the current session.
//!
//! Every request goes through the same short sequence:
//!
//! 1. read the current session and send with its bearer token
//! 2. on 401, refresh the session once
//! 3. if the refresh worked, re-issue the identical request once and return
//!    whatever it produces; otherwise sign out and report `Unauthorized`
//!
//! Every other failure is classified and returned without retrying.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

use super::classify::{RawFailure, classify, signed_out};
use super::error::ApiError;
use crate::config::ClientConfig;
use crate::session::{Session, SessionProvider, mask_token};

/// Response header carrying the server's correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A request as the caller described it. Re-sent verbatim after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Body is not valid JSON: {}", e)))?;
        Ok(self.body(value))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn json_body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

/// Result of a single round trip.
enum Attempt {
    Success(String),
    Unauthorized(RawFailure),
    Failed(RawFailure),
}

/// Backend API client. Cheap to clone; clones share the connection pool and
/// the session provider.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Arc<dyn SessionProvider>,
}

impl ApiClient {
    /// Build a client from configuration. Fails when no API URL is configured.
    pub fn new(config: &ClientConfig, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let base_url = config.require_api_url()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Self::with_client(client, base_url, session)
    }

    /// Wrap an already configured reqwest client.
    pub fn with_client(
        client: Client,
        base_url: &str,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("Invalid API URL '{}'", base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!("API URL must use http or https, got '{}'", base_url);
        }
        debug!("API client for {}", base_url);

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send `req` and hand the body of a successful response to `parser`.
    ///
    /// A parser failure is reported as [`ApiError::Parse`]; transport and HTTP
    /// failures as [`ApiError::Classified`].
    #[tracing::instrument(skip(self, req, parser), fields(method = %req.method, path = %req.path))]
    pub async fn request<T, P>(&self, req: &OutboundRequest, parser: P) -> Result<T, ApiError>
    where
        P: FnOnce(&str) -> Result<T>,
    {
        let body = self.execute(req).await?;
        parser(&body).map_err(ApiError::Parse)
    }

    /// Send `req` and return the raw response body.
    pub async fn send(&self, req: &OutboundRequest) -> Result<String, ApiError> {
        self.request(req, |body| Ok(body.to_string())).await
    }

    /// Send `req` and deserialize the JSON response body.
    pub async fn send_json<T: DeserializeOwned>(&self, req: &OutboundRequest) -> Result<T, ApiError> {
        self.request(req, |body| {
            serde_json::from_str(body).context("Failed to parse JSON response")
        })
        .await
    }

    /// Like [`ApiClient::request`], but gives up with `Cancelled` as soon as
    /// `cancel` completes. A session refresh already under way still finishes.
    pub async fn request_until<T, P, C>(
        &self,
        req: &OutboundRequest,
        parser: P,
        cancel: C,
    ) -> Result<T, ApiError>
    where
        P: FnOnce(&str) -> Result<T>,
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.request(req, parser) => result,
            () = cancel => {
                debug!("{} {} cancelled by caller", req.method, req.path);
                Err(ApiError::Classified(classify(&RawFailure::cancelled())))
            }
        }
    }

    async fn execute(&self, req: &OutboundRequest) -> Result<String, ApiError> {
        let token = self.session.current().await.map(|s| s.access_token);
        if token.is_none() {
            debug!("No session, sending {} {} unauthenticated", req.method, req.path);
        }

        let raw = match self.attempt(req, token.as_deref()).await? {
            Attempt::Success(body) => return Ok(body),
            Attempt::Failed(raw) => return Err(ApiError::Classified(classify(&raw))),
            Attempt::Unauthorized(raw) => raw,
        };

        info!("{} {} was rejected as unauthorized, refreshing session", req.method, req.path);
        let Some(session) = self.refresh_or_sign_out().await else {
            return Err(ApiError::Classified(signed_out(&raw)));
        };

        // The retry's outcome is final, including a second 401.
        match self.attempt(req, Some(&session.access_token)).await? {
            Attempt::Success(body) => Ok(body),
            Attempt::Unauthorized(raw) => {
                warn!("{} {} still unauthorized after refresh", req.method, req.path);
                Err(ApiError::Classified(classify(&raw)))
            }
            Attempt::Failed(raw) => Err(ApiError::Classified(classify(&raw))),
        }
    }

    /// Refresh the session once. On failure the session is cleared.
    ///
    /// Runs on its own task so a caller dropping the request cannot leave the
    /// session store half-updated.
    async fn refresh_or_sign_out(&self) -> Option<Session> {
        let session = Arc::clone(&self.session);
        let task = tokio::spawn(async move {
            match session.refresh().await {
                Ok(refreshed) => Some(refreshed),
                Err(e) => {
                    warn!("Session refresh failed, signing out: {:#}", e);
                    session.clear().await;
                    None
                }
            }
        });

        match task.await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!("Session refresh task failed, signing out: {}", e);
                self.session.clear().await;
                None
            }
        }
    }

    async fn attempt(
        &self,
        req: &OutboundRequest,
        token: Option<&str>,
    ) -> Result<Attempt, ApiError> {
        let url = self.url_for(&req.path)?;
        debug!("{} {}...", req.method, url);

        let mut builder = self.client.request(req.method.clone(), url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            debug!("Authorizing with session token {}", mask_token(token));
            builder = builder.header(AUTHORIZATION, bearer_header(token)?);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} {} failed before a response: {}", req.method, req.path, e);
                return Ok(Attempt::Failed(RawFailure::from_transport(&e)));
            }
        };

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(Attempt::Failed(RawFailure::from_transport(&e))),
        };

        if status.is_success() {
            return Ok(Attempt::Success(body));
        }

        debug!("{} {} returned {}", req.method, req.path, status);
        let raw = RawFailure::from_status(status.as_u16(), body, request_id);
        if status == StatusCode::UNAUTHORIZED {
            Ok(Attempt::Unauthorized(raw))
        } else {
            Ok(Attempt::Failed(raw))
        }
    }

    fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid request path '{}': {}", path, e)))
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        ApiError::InvalidRequest("Session token contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
