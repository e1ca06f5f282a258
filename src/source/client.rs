//! HTTP client for the board catalog and thread endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::error::SourceError;
use super::model::{Catalog, ThreadPage};
use crate::user_agent;

/// Cookie every request carries to pass the age gate.
const AGE_GATE_COOKIE: &str = "ageallow=1";

/// Read access to a board source.
///
/// The harvester and thread selector only talk to the source through this
/// trait, so tests can swap in fakes.
#[async_trait]
pub trait BoardSource: Send + Sync + std::fmt::Debug {
    /// Base URL that server-relative file paths are resolved against.
    fn base_url(&self) -> &str;

    /// Fetches the catalog of `board`.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] on network failure, non-200 status or
    /// malformed JSON.
    async fn catalog(&self, board: &str) -> Result<Catalog, SourceError>;

    /// Fetches the full content of thread `num` on `board`.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] on network failure, non-200 status or
    /// malformed JSON.
    async fn thread(&self, board: &str, num: &str) -> Result<ThreadPage, SourceError>;

    /// Resolves a file path from a thread page into an absolute URL.
    fn file_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Builds the HTTP client shared by the source client and the downloader.
///
/// The client carries the age-gate cookie and, when non-empty, the
/// `usercode_auth` cookie, both scoped to `base_url`.
///
/// # Errors
///
/// Returns [`SourceError::InvalidBaseUrl`] if `base_url` does not parse and
/// [`SourceError::Client`] if reqwest rejects the configuration.
#[instrument(level = "debug", skip(usercode_auth))]
pub fn build_http_client(
    base_url: &str,
    usercode_auth: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, SourceError> {
    let url = Url::parse(base_url).map_err(|_| SourceError::InvalidBaseUrl {
        url: base_url.to_string(),
    })?;

    let jar = Jar::default();
    jar.add_cookie_str(&format!("{AGE_GATE_COOKIE}; Path=/"), &url);
    if let Some(code) = usercode_auth.filter(|code| !code.is_empty()) {
        jar.add_cookie_str(&format!("usercode_auth={code}; Path=/"), &url);
    } else {
        debug!("no usercode_auth configured, requests are anonymous");
    }

    Client::builder()
        .cookie_provider(Arc::new(jar))
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .build()
        .map_err(|source| SourceError::Client { source })
}

/// [`BoardSource`] over the JSON HTTP API.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: Client,
    base_url: String,
}

impl SourceClient {
    /// Creates a source client issuing requests through `client`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SourceError::network(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::http_status(url, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::network(url, e))?;
        serde_json::from_slice(&body).map_err(|e| SourceError::decode(url, e))
    }
}

#[async_trait]
impl BoardSource for SourceClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self))]
    async fn catalog(&self, board: &str) -> Result<Catalog, SourceError> {
        let url = format!("{}/{board}/catalog.json", self.base_url);
        let catalog: Catalog = self.get_json(&url).await?;
        debug!(threads = catalog.threads.len(), "fetched catalog");
        Ok(catalog)
    }

    #[instrument(skip(self))]
    async fn thread(&self, board: &str, num: &str) -> Result<ThreadPage, SourceError> {
        let url = format!("{}/{board}/res/{num}.json", self.base_url);
        self.get_json(&url).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer, usercode: Option<&str>) -> SourceClient {
        let http = build_http_client(
            &server.uri(),
            usercode,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        SourceClient::new(http, server.uri())
    }

    #[tokio::test]
    async fn test_catalog_fetch_and_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/catalog.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "board": {"id": "b"},
                "threads": [{"num": 100, "subject": "cats", "files_count": 4}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = client_for(&server, None).catalog("b").await.unwrap();

        assert_eq!(catalog.board.id, "b");
        assert_eq!(catalog.threads.len(), 1);
        assert_eq!(catalog.threads[0].files_count, 4);
    }

    #[tokio::test]
    async fn test_thread_fetch_uses_res_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/res/200.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current_thread": 200,
                "threads": [{"posts": [{"files": [{"path": "/b/src/200/1.png", "md5": "m"}]}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server, None).thread("b", "200").await.unwrap();
        assert_eq!(page.current_thread, "200");
        assert_eq!(page.files().count(), 1);
    }

    #[tokio::test]
    async fn test_non_200_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client_for(&server, None).catalog("b").await;
        assert!(matches!(
            result,
            Err(SourceError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = client_for(&server, None).catalog("b").await;
        assert!(matches!(result, Err(SourceError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_requests_carry_auth_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/catalog.json"))
            .and(header_regex("cookie", "usercode_auth=secret"))
            .and(header_regex("cookie", "ageallow=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = client_for(&server, Some("secret"))
            .catalog("b")
            .await
            .unwrap();
        assert!(catalog.threads.is_empty());
    }

    #[test]
    fn test_invalid_base_url() {
        let result = build_http_client(
            "not a url",
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(SourceError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_file_url_joins_base() {
        let client = SourceClient::new(Client::new(), "https://example.com/");
        assert_eq!(
            client.file_url("/b/src/1/2.jpg"),
            "https://example.com/b/src/1/2.jpg"
        );
        assert_eq!(
            client.file_url("b/src/1/2.jpg"),
            "https://example.com/b/src/1/2.jpg"
        );
        assert_eq!(
            client.file_url("https://cdn.example.com/x.jpg"),
            "https://cdn.example.com/x.jpg"
        );
    }
}
