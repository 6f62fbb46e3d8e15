//! HTTP transport
//!
//! This module handles the request side of the crawler:
//! - The `Transport` trait the orchestrator fetches through
//! - A reqwest-backed transport, one connection pool per identity
//! - The browser-plausible header set sent with every request
//! - Transport error classification

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION,
    COOKIE, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// A fetched response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body decoded as text
    pub body: String,
    /// Response headers (`set-cookie` carries token rotations)
    pub headers: HeaderMap,
}

/// One request handed to a transport
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

/// Failure to obtain any response
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Invalid request header: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("Request failed for {url}: {message}")]
    Other { url: String, message: String },
}

/// Fetches a URL and returns the response or a transport failure
///
/// Implementations own the session (connection pool, TLS handshake profile)
/// of a single identity.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        (**self).fetch(request).await
    }
}

/// reqwest-backed transport
///
/// The handshake profile identifier is kept for logging only; reqwest negotiates
/// TLS with rustls defaults. A fingerprinting transport plugs in through
/// [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    tls_profile: String,
}

impl HttpTransport {
    /// Builds a transport with its own connection pool
    ///
    /// # Arguments
    ///
    /// * `tls_profile` - Browser profile identifier of the owning identity
    pub fn new(tls_profile: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            tls_profile: tls_profile.to_string(),
        })
    }

    pub fn tls_profile(&self) -> &str {
        &self.tls_profile
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let response = self
            .client
            .get(&request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&request.url, e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&request.url, e))?;

        Ok(FetchResponse {
            status,
            body,
            headers,
        })
    }
}

fn classify_reqwest_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        TransportError::Other {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Builds the header set of a top-level browser navigation
///
/// Accept-Encoding is left to the HTTP client so that it matches the
/// decoders it actually has.
///
/// # Arguments
///
/// * `user_agent` - User-Agent string
/// * `referer` - URL of the page this navigation comes from
/// * `cookie` - Session cookie as `(name, value)`
pub fn browser_headers(
    user_agent: &str,
    referer: &str,
    cookie: (&str, &str),
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();

    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_str(referer)?);

    for (name, value) in [
        ("sec-ch-ua", r#""Chromium";v="131", "Not_A Brand";v="24""#),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""Windows""#),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-user", "?1"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    let (cookie_name, token) = cookie;
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!("{}={}", cookie_name, token))?,
    );

    Ok(headers)
}
