//! EDS OWServer transport: retrieve the `details.xml` status feed.
//!
//! The gateway address is either a bare `host[:port]`, a full
//! `http(s)://` origin, or a `file://<path>` pointing at a saved feed.
//! Retrieval measures wall-clock latency and applies a bounded timeout so
//! a stalled gateway cannot starve the poll schedule. There is no retry
//! here; the next scheduled poll is the retry.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Transport constants.
pub mod consts {
    use std::time::Duration;

    /// Path of the XML status page on EDS OWServer gateways.
    pub const DETAILS_PATH: &str = "/details.xml";
    /// Prefix selecting file access instead of HTTP.
    pub const FILE_SCHEME: &str = "file://";
    /// Default bound for one retrieval, connect included.
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Error type produced while fetching the status feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No gateway address configured.
    #[error("gateway address is not configured")]
    AddressMissing,
    /// Reading a `file://` feed failed.
    #[error("unable to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The HTTP request could not be completed (includes timeouts).
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The gateway answered with a non-success status code.
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Where and how to reach one gateway.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Gateway address: `host[:port]`, `http(s)://origin` or `file://path`.
    pub address: String,
    /// Basic auth login; empty disables authentication.
    pub login: String,
    /// Basic auth password.
    pub password: String,
    /// Upper bound for one retrieval.
    pub timeout: Duration,
}

impl Endpoint {
    /// Endpoint with default timeout and no credentials.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            login: String::new(),
            password: String::new(),
            timeout: consts::FETCH_TIMEOUT,
        }
    }

    /// Attach basic auth credentials.
    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = login.into();
        self.password = password.into();
        self
    }

    /// Override the retrieval timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of the status page for HTTP endpoints.
    pub fn details_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}{}", self.address.trim_end_matches('/'), consts::DETAILS_PATH)
        } else {
            format!("http://{}{}", self.address, consts::DETAILS_PATH)
        }
    }
}

/// A successfully retrieved feed with its retrieval latency.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Raw XML document bytes.
    pub body: Vec<u8>,
    /// Wall-clock time spent on the retrieval.
    pub latency: Duration,
}

/// Retrieve the raw XML feed from `endpoint`.
pub async fn fetch(endpoint: &Endpoint) -> Result<Fetched, FetchError> {
    if endpoint.address.is_empty() {
        return Err(FetchError::AddressMissing);
    }
    let started = Instant::now();
    let body = if let Some(path) = endpoint.address.strip_prefix(consts::FILE_SCHEME) {
        read_file(path).await?
    } else {
        read_http(endpoint).await?
    };
    let latency = started.elapsed();
    debug!(
        address = %endpoint.address,
        bytes = body.len(),
        latency_ms = latency.as_millis() as u64,
        "fetched status feed"
    );
    Ok(Fetched { body, latency })
}

async fn read_file(path: &str) -> Result<Vec<u8>, FetchError> {
    tokio::fs::read(path).await.map_err(|source| FetchError::File {
        path: path.to_string(),
        source,
    })
}

async fn read_http(endpoint: &Endpoint) -> Result<Vec<u8>, FetchError> {
    let url = endpoint.details_url();
    let http_err = |source| FetchError::Http {
        url: url.clone(),
        source,
    };

    let client = reqwest::Client::builder()
        .timeout(endpoint.timeout)
        .build()
        .map_err(http_err)?;
    let mut request = client.get(&url);
    if !endpoint.login.is_empty() {
        request = request.basic_auth(&endpoint.login, Some(&endpoint.password));
    }
    let response = request.send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status { url, status });
    }
    let body = response.bytes().await.map_err(http_err)?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_url_for_bare_host() {
        let ep = Endpoint::new("10.0.0.5");
        assert_eq!(ep.details_url(), "http://10.0.0.5/details.xml");
        let ep = Endpoint::new("10.0.0.5:8080");
        assert_eq!(ep.details_url(), "http://10.0.0.5:8080/details.xml");
    }

    #[test]
    fn details_url_keeps_explicit_scheme() {
        let ep = Endpoint::new("https://gw.example.net/");
        assert_eq!(ep.details_url(), "https://gw.example.net/details.xml");
    }

    #[tokio::test]
    async fn empty_address_is_rejected() {
        let err = fetch(&Endpoint::new("")).await.unwrap_err();
        assert!(matches!(err, FetchError::AddressMissing));
    }

    #[tokio::test]
    async fn file_feed_is_read_with_latency() {
        let path = std::env::temp_dir().join("tl-eds-fixture.xml");
        tokio::fs::write(&path, b"<root/>").await.expect("write fixture");
        let address = format!("file://{}", path.display());
        let fetched = fetch(&Endpoint::new(address)).await.expect("fetch");
        assert_eq!(fetched.body, b"<root/>");
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let err = fetch(&Endpoint::new("file:///no/such/feed.xml"))
            .await
            .unwrap_err();
        match err {
            FetchError::File { path, .. } => assert_eq!(path, "/no/such/feed.xml"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
