//! Read-only existence probes against the public npm registry.
//!
//! Each probe builds a target URL, wraps it in the configured CORS proxy,
//! issues the request with a timeout, and reports whether the name already
//! exists in that namespace. Failures surface as [`ProbeError`] and are never
//! turned into a negative answer.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, warn};
use ureq::Agent;
use url::Url;

use crate::config::Config;

/// Highest sentinel code point, used as the upper bound of a key-prefix range.
const RANGE_SENTINEL: char = '\u{FFF0}';

/// A raw probe failure, before classification.
///
/// See [`classify`](crate::classify::classify) for how each variant maps to a
/// user-facing error kind.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The request was cancelled because its timeout fired.
    #[error("request aborted{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Aborted {
        /// Why the request was cancelled, if known.
        reason: Option<String>,
    },
    /// The request could not be completed through the proxy in a usable way
    /// (bad URI, TLS, redirect or proxy failure).
    #[error("Failed to fetch: {message}")]
    FetchFailed {
        /// Underlying transport message.
        message: String,
    },
    /// The host could not be reached.
    #[error("Network error: {message}")]
    Network {
        /// Underlying transport message.
        message: String,
    },
    /// The upstream answered with a status the probe does not accept.
    #[error("Server responded with status {code}")]
    Status {
        /// HTTP status code.
        code: u16,
    },
    /// The response body was not the JSON shape the probe expects.
    #[error("invalid JSON in registry response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The worker running the blocking request failed.
    #[error("probe task failed: {0}")]
    Internal(String),
    /// Any other failure, described by its message.
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    /// The HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<ureq::Error> for ProbeError {
    fn from(e: ureq::Error) -> Self {
        match &e {
            ureq::Error::StatusCode(code) => Self::Status { code: *code },
            ureq::Error::Timeout(_) => Self::Aborted {
                reason: Some(e.to_string()),
            },
            ureq::Error::Io(_) | ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
                Self::Network {
                    message: e.to_string(),
                }
            }
            _ => Self::FetchFailed {
                message: e.to_string(),
            },
        }
    }
}

/// The three existence checks the availability resolver relies on.
///
/// Every method answers "does this name already exist here?". An `Err` means
/// the question could not be answered, never that the name is free.
pub trait Registry: Send + Sync {
    /// Whether any package is authored by a user called `name`.
    fn user_exists(&self, name: &str) -> impl Future<Output = Result<bool, ProbeError>> + Send;

    /// Whether any package is published under the `@name/` scope.
    fn scope_exists(&self, name: &str) -> impl Future<Output = Result<bool, ProbeError>> + Send;

    /// Whether an organization page exists for `name`.
    fn organization_exists(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<bool, ProbeError>> + Send;
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ProbeError> {
    let mut url = Url::parse(base).map_err(|e| ProbeError::FetchFailed {
        message: format!("invalid base URL `{base}`: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| ProbeError::FetchFailed {
            message: format!("base URL `{base}` cannot carry a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Registry search for packages authored by `name`, limited to one result.
///
/// ```
/// use npm_avail::registry::user_search_url;
///
/// let url = user_search_url("https://registry.npmjs.com", "acme").unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://registry.npmjs.com/-/v1/search?text=author%3Aacme&size=1"
/// );
/// ```
///
/// # Errors
///
/// Returns [`ProbeError::FetchFailed`] if `base` is not a usable URL.
pub fn user_search_url(base: &str, name: &str) -> Result<Url, ProbeError> {
    let mut url = endpoint(base, &["-", "v1", "search"])?;
    url.query_pairs_mut()
        .append_pair("text", &format!("author:{name}"))
        .append_pair("size", "1");
    Ok(url)
}

/// Range query over every document key starting with `@name/`.
///
/// # Errors
///
/// Returns [`ProbeError::FetchFailed`] if `base` is not a usable URL.
pub fn scope_range_url(base: &str, name: &str) -> Result<Url, ProbeError> {
    let mut url = endpoint(base, &["_all_docs"])?;
    url.query_pairs_mut()
        .append_pair("startkey", &format!("\"@{name}/\""))
        .append_pair("endkey", &format!("\"@{name}/{RANGE_SENTINEL}\""));
    Ok(url)
}

/// The organization's public page.
///
/// # Errors
///
/// Returns [`ProbeError::FetchFailed`] if `base` is not a usable URL.
pub fn organization_page_url(base: &str, name: &str) -> Result<Url, ProbeError> {
    endpoint(base, &["org", name])
}

/// Wrap `target` in a proxy prefix, percent-encoding it as one query value.
///
/// ```
/// use npm_avail::registry::proxied;
/// use url::Url;
///
/// let target = Url::parse("https://www.npmjs.com/org/acme").unwrap();
/// assert_eq!(
///     proxied(Some("https://corsmirror.com/v1?url="), &target),
///     "https://corsmirror.com/v1?url=https%3A%2F%2Fwww.npmjs.com%2Forg%2Facme"
/// );
/// assert_eq!(proxied(None, &target), "https://www.npmjs.com/org/acme");
/// ```
#[must_use]
pub fn proxied(prefix: Option<&str>, target: &Url) -> String {
    match prefix {
        Some(prefix) => {
            let encoded: String =
                url::form_urlencoded::byte_serialize(target.as_str().as_bytes()).collect();
            format!("{prefix}{encoded}")
        }
        None => target.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    objects: Vec<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<IgnoredAny>,
}

/// [`Registry`] backed by HTTP requests to npm.
///
/// Requests are blocking `ureq` calls moved onto Tokio's blocking pool, so
/// the methods must be awaited inside a Tokio runtime.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    agent: Agent,
    config: Config,
}

impl HttpRegistry {
    /// Create a registry client from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.probe_timeout))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build();
        Self {
            agent: Agent::new_with_config(agent_config),
            config,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn request_url(&self, target: &Url) -> String {
        proxied(self.config.proxy_prefix.as_deref(), target)
    }

    /// Run `call` on the blocking pool, abandoning it after the probe timeout.
    async fn blocking<T, F>(&self, call: F) -> Result<T, ProbeError>
    where
        F: FnOnce(&Agent) -> Result<T, ProbeError> + Send + 'static,
        T: Send + 'static,
    {
        let agent = self.agent.clone();
        let timeout = self.config.probe_timeout;
        let task = tokio::task::spawn_blocking(move || call(&agent));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProbeError::Internal(e.to_string())),
            Err(_) => Err(ProbeError::Aborted {
                reason: Some(format!("Request timed out after {}", format_duration(timeout))),
            }),
        }
    }

    async fn get_json<T>(&self, target: Url) -> Result<T, ProbeError>
    where
        T: DeserializeOwned,
    {
        let url = self.request_url(&target);
        debug!(%target, "GET");
        let body = self
            .blocking(move |agent| {
                let mut response = agent.get(url.as_str()).call()?;
                Ok(response.body_mut().read_to_string()?)
            })
            .await
            .inspect_err(|e| warn!(%target, error = %e, "probe failed"))?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

impl Registry for HttpRegistry {
    async fn user_exists(&self, name: &str) -> Result<bool, ProbeError> {
        let target = user_search_url(&self.config.registry_url, name)?;
        let response: SearchResponse = self.get_json(target).await?;
        Ok(!response.objects.is_empty())
    }

    async fn scope_exists(&self, name: &str) -> Result<bool, ProbeError> {
        let target = scope_range_url(&self.config.replicate_url, name)?;
        let response: AllDocsResponse = self.get_json(target).await?;
        Ok(!response.rows.is_empty())
    }

    async fn organization_exists(&self, name: &str) -> Result<bool, ProbeError> {
        let target = organization_page_url(&self.config.website_url, name)?;
        let url = self.request_url(&target);
        debug!(%target, "HEAD");
        self.blocking(move |agent| match agent.head(url.as_str()).call() {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => Err(ProbeError::Status {
                code: response.status().as_u16(),
            }),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
        .inspect_err(|e| warn!(%target, error = %e, "probe failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn direct(server: &MockServer) -> HttpRegistry {
        HttpRegistry::new(
            Config::default()
                .without_proxy()
                .with_base_url(server.uri()),
        )
    }

    #[test]
    fn search_url_shape() {
        let url = user_search_url("https://registry.npmjs.com", "acme").unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.npmjs.com/-/v1/search?text=author%3Aacme&size=1"
        );
    }

    #[test]
    fn scope_range_url_shape() {
        let url = scope_range_url("https://replicate.npmjs.com", "acme").unwrap();
        assert_eq!(
            url.as_str(),
            "https://replicate.npmjs.com/_all_docs?startkey=%22%40acme%2F%22&endkey=%22%40acme%2F%EF%BF%B0%22"
        );
        let (_, endkey) = url.query_pairs().nth(1).unwrap();
        assert_eq!(endkey, "\"@acme/\u{FFF0}\"");
    }

    #[test]
    fn organization_url_shape() {
        let url = organization_page_url("https://www.npmjs.com", "acme").unwrap();
        assert_eq!(url.as_str(), "https://www.npmjs.com/org/acme");
    }

    #[test]
    fn trailing_slash_on_base_is_tolerated() {
        let url = organization_page_url("http://127.0.0.1:8080/", "acme").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/org/acme");
    }

    #[test]
    fn unusable_base_is_fetch_failure() {
        assert!(matches!(
            user_search_url("not a url", "acme"),
            Err(ProbeError::FetchFailed { .. })
        ));
    }

    #[test]
    fn proxy_wraps_whole_target() {
        let target = user_search_url("https://registry.npmjs.com", "acme").unwrap();
        assert_eq!(
            proxied(Some("https://corsmirror.com/v1?url="), &target),
            "https://corsmirror.com/v1?url=https%3A%2F%2Fregistry.npmjs.com%2F-%2Fv1%2Fsearch%3Ftext%3Dauthor%253Aacme%26size%3D1"
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(ProbeError::Aborted { reason: None }.to_string(), "request aborted");
        assert_eq!(
            ProbeError::Status { code: 503 }.to_string(),
            "Server responded with status 503"
        );
        assert!(
            ProbeError::Network {
                message: "connection refused".into()
            }
            .to_string()
            .starts_with("Network error")
        );
    }

    #[tokio::test]
    async fn user_probe_reports_existing_author() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .and(query_param("text", "author:acme"))
            .and(query_param("size", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objects": [{ "package": { "name": "acme-utils" } }],
                "total": 1,
                "time": "Mon Jan 01 2024"
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(direct(&server).user_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn user_probe_reports_unknown_author() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objects": [],
                "total": 0,
                "time": "Mon Jan 01 2024"
            })))
            .mount(&server)
            .await;

        assert!(!direct(&server).user_exists("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn user_probe_server_error_is_failure_not_negative() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        match direct(&server).user_exists("acme").await {
            Err(ProbeError::Status { code: 503 }) => {}
            other => panic!("expected Status 503, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_propagates_as_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            direct(&server).user_exists("acme").await,
            Err(ProbeError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn scope_probe_queries_key_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_all_docs"))
            .and(query_param("startkey", "\"@acme/\""))
            .and(query_param("endkey", "\"@acme/\u{FFF0}\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_rows": 3_000_000,
                "offset": 42,
                "rows": [{ "id": "@acme/core", "key": "@acme/core", "value": { "rev": "1-a" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(direct(&server).scope_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn scope_probe_empty_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_all_docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_rows": 3_000_000,
                "offset": 42,
                "rows": []
            })))
            .mount(&server)
            .await;

        assert!(!direct(&server).scope_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn organization_probe_found() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/org/acme"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(direct(&server).organization_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn organization_probe_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/org/acme"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(!direct(&server).organization_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn organization_probe_other_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/org/acme"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        match direct(&server).organization_exists("acme").await {
            Err(ProbeError::Status { code: 403 }) => {}
            other => panic!("expected Status 403, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn requests_go_through_proxy() {
        let server = MockServer::start().await;
        let target = organization_page_url("https://www.npmjs.com", "acme").unwrap();
        Mock::given(method("HEAD"))
            .and(path("/v1"))
            .and(query_param("url", target.as_str()))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let registry =
            HttpRegistry::new(Config::default().with_proxy(format!("{}/v1?url=", server.uri())));
        assert!(!registry.organization_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn slow_response_is_aborted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "objects": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let registry = HttpRegistry::new(
            Config::default()
                .without_proxy()
                .with_base_url(server.uri())
                .with_probe_timeout(Duration::from_millis(200)),
        );
        assert!(matches!(
            registry.user_exists("acme").await,
            Err(ProbeError::Aborted { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let registry = HttpRegistry::new(
            Config::default()
                .without_proxy()
                .with_base_url("http://127.0.0.1:1")
                .with_probe_timeout(Duration::from_secs(5)),
        );
        match registry.user_exists("acme").await {
            Err(ProbeError::Network { .. }) => {}
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "requires network access; run with: cargo test -- --ignored"]
    async fn live_user_probe_finds_prolific_author() {
        let registry = HttpRegistry::new(Config::default().without_proxy());
        assert!(registry.user_exists("sindresorhus").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn live_scope_probe_finds_types() {
        let registry = HttpRegistry::new(Config::default().without_proxy());
        assert!(registry.scope_exists("types").await.unwrap());
    }
}
