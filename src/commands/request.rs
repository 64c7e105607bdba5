use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use reqwest::Method;

use crate::{config::ConfigOverrides, http::OutboundRequest, runtime::Runtime};

use super::connect;

/// Send an arbitrary request to the backend and print the response body.
#[tracing::instrument(skip(runtime, overrides, query, data))]
pub async fn request<R: Runtime + 'static>(
    runtime: R,
    overrides: &ConfigOverrides,
    method: &str,
    path: &str,
    query: &[String],
    data: Option<&str>,
) -> Result<()> {
    let req = build_request(method, path, query, data)?;
    let client = connect(runtime, overrides)?;

    let body = client.send(&req).await?;
    debug!("Received {} bytes", body.len());
    println!("{}", body);
    Ok(())
}

fn build_request(
    method: &str,
    path: &str,
    query: &[String],
    data: Option<&str>,
) -> Result<OutboundRequest> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("Invalid HTTP method '{}'", method))?;

    let mut req = OutboundRequest::new(method, path);
    for pair in query {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid query parameter '{}'. Expected key=value.", pair);
        };
        req = req.query(key, value);
    }

    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("Request body is not valid JSON")?;
        req = req.body(body);
    }

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use mockito::{Matcher, Server};
    use tempfile::tempdir;

    #[test]
    fn test_build_request() {
        let req = build_request(
            "post",
            "/groups",
            &["limit=10".to_string(), "filter=a=b".to_string()],
            Some(r#"{"name": "Friday crew"}"#),
        )
        .unwrap();

        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.path(), "/groups");
        assert_eq!(
            req.query_pairs(),
            &[
                ("limit".to_string(), "10".to_string()),
                ("filter".to_string(), "a=b".to_string())
            ]
        );
        assert_eq!(
            req.json_body(),
            Some(&serde_json::json!({"name": "Friday crew"}))
        );
    }

    #[test]
    fn test_build_request_rejects_bad_input() {
        assert!(build_request("GE T", "/", &[], None).is_err());
        assert!(build_request("GET", "/", &["novalue".to_string()], None).is_err());
        assert!(build_request("POST", "/", &[], Some("{not json")).is_err());
    }

    #[tokio::test]
    async fn test_request_command_hits_backend() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/groups")
            .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let overrides = ConfigOverrides {
            api_url: Some(server.url()),
            session_file: Some(dir.path().join("session.json")),
            ..Default::default()
        };

        request(
            RealRuntime,
            &overrides,
            "GET",
            "/groups",
            &["limit=5".to_string()],
            None,
        )
        .await
        .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_request_command_surfaces_classified_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/groups/g1")
            .with_status(403)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let overrides = ConfigOverrides {
            api_url: Some(server.url()),
            session_file: Some(dir.path().join("session.json")),
            ..Default::default()
        };

        let err = request(RealRuntime, &overrides, "GET", "/groups/g1", &[], None)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Not allowed"));
    }
}
