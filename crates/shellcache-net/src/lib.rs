//! # ShellCache Net
//!
//! HTTP networking for the ShellCache gateway.
//!
//! ## Design Goals
//!
//! 1. **Buffered responses**: bodies are read once into [`Bytes`], so a
//!    response can be handed to a caller and to a cache writer without a
//!    rewindable stream.
//! 2. **Fetcher seam**: the gateway talks to the network only through the
//!    [`Fetcher`] trait; [`ResourceLoader`] is the `reqwest` implementation.
//! 3. **Routing patterns**: [`UrlPattern`] classifies request URLs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use shellcache_common::ShellCacheError;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod pattern;

pub use pattern::UrlPattern;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ShellCacheError {
    fn from(err: NetError) -> Self {
        ShellCacheError::network_with_source("fetch failed", err)
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse a URL string into a request.
    pub fn parse(method: &str, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| NetError::RequestFailed(format!("bad method {method:?}: {e}")))?;
        Ok(Self::new(method, url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a read-only GET.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// HTTP response with a fully buffered body.
///
/// Cloning is cheap: the body is a reference-counted [`Bytes`].
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// True when served from a cache generation instead of the network.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            from_cache: false,
            body,
        }
    }

    /// Mark the response as served from cache.
    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Parsed `Content-Type`, if present.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Whether the body is declared as text (`text/*`, JSON, XML or JavaScript).
    pub fn is_text(&self) -> bool {
        self.content_type().is_some_and(|ct| {
            ct.type_() == mime::TEXT
                || ct.subtype() == mime::JSON
                || ct.subtype() == mime::XML
                || ct.subtype() == mime::JAVASCRIPT
                || ct.suffix() == Some(mime::JSON)
        })
    }
}

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Response, NetError>> + Send + 'a>>;

/// Something that can perform a network request.
///
/// Any HTTP status is a successful fetch; only transport failures are
/// errors.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ShellCache/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed fetcher.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    async fn execute(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);

        let response = req_builder.send().await.map_err(|e| map_error(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let body = response.bytes().await.map_err(|e| map_error(e, timeout))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }

}

/// `timeout` is the limit that applied to the failed request.
fn map_error(err: reqwest::Error, timeout: Duration) -> NetError {
    if err.is_timeout() {
        NetError::Timeout(timeout)
    } else {
        NetError::HttpError(err)
    }
}

impl Fetcher for ResourceLoader {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
        Box::pin(self.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert!(request.is_get());
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_request_parse_method() {
        let request = Request::parse("post", "https://example.com/rows").unwrap();
        assert_eq!(request.method, Method::POST);
        assert!(!request.is_get());

        assert!(matches!(
            Request::parse("GET", "not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_response_is_text() {
        let url = Url::parse("https://example.com/").unwrap();
        let with_type = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(value));
            Response::new(url.clone(), StatusCode::OK, headers, Bytes::new())
        };

        assert!(with_type("text/html; charset=utf-8").is_text());
        assert!(with_type("application/json").is_text());
        assert!(with_type("application/manifest+json").is_text());
        assert!(!with_type("image/png").is_text());
        assert!(!Response::new(url.clone(), StatusCode::OK, HeaderMap::new(), Bytes::new()).is_text());
    }

    #[test]
    fn test_response_clone_shares_body() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let response = Response::new(url, StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"x"));
        let copy = response.clone();
        assert_eq!(response.body().as_ptr(), copy.body().as_ptr());
        assert!(!copy.from_cache);
        assert!(copy.cached().from_cache);
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("ShellCache/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_loader_fetches_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rows"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"a":1}"#),
            )
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/rows", server.uri())).unwrap();
        let response = loader.fetch(&Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JSON));
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["a"], 1);
    }

    #[tokio::test]
    async fn test_loader_error_status_is_not_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let response = loader.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_loader_reports_per_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        let request = Request::get(url).timeout(Duration::from_millis(100));

        match loader.fetch(&request).await {
            Err(NetError::Timeout(limit)) => assert_eq!(limit, Duration::from_millis(100)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_loader_connection_refused() {
        let server = MockServer::start().await;
        let url = Url::parse(&format!("{}/gone", server.uri())).unwrap();
        drop(server);

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        assert!(loader.fetch(&Request::get(url)).await.is_err());
    }
}
