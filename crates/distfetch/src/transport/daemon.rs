//! Local daemon transport.
//!
//! The daemon exposes an HTTP RPC API whose address is written to the `api`
//! file of its repository directory as a multiaddr, for example
//! `/ip4/127.0.0.1/tcp/5001`.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{BoxedReader, FetchSource, FetchStream, Fetcher, read_error_body};
use crate::config::FetchConfig;
use crate::{Error, Result};

/// Name of the endpoint file inside the daemon repository.
pub const API_FILE: &str = "api";

/// Reply to a content request.
pub struct DaemonResponse {
    /// Content stream, present on success.
    pub output: Option<BoxedReader>,
    /// Error reported by the daemon.
    pub error: Option<String>,
}

impl DaemonResponse {
    /// A successful reply carrying `output`.
    #[must_use]
    pub fn ok(output: BoxedReader) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    /// A reply carrying a daemon-side error.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Client for a local content daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Locate the daemon's API endpoint.
    async fn resolve_endpoint(&self) -> Result<String>;

    /// Whether the daemon at `endpoint` answers.
    async fn is_reachable(&self, endpoint: &str) -> bool;

    /// Request the content stored at `path`.
    async fn request_content(&self, endpoint: &str, path: &str) -> Result<DaemonResponse>;
}

/// [`Fetcher`] that reads through a [`DaemonClient`].
pub struct DaemonFetcher<C> {
    client: C,
    size_limit: u64,
}

impl<C: DaemonClient> DaemonFetcher<C> {
    /// Create a fetcher over `client`.
    pub const fn new(client: C, size_limit: u64) -> Self {
        Self { client, size_limit }
    }

    async fn open(&self, path: &str) -> Result<FetchStream> {
        let endpoint = self.client.resolve_endpoint().await?;
        trace!(%endpoint, "Resolved daemon endpoint");

        if !self.client.is_reachable(&endpoint).await {
            return Err(Error::daemon(format!("daemon at {endpoint} is not up")));
        }

        let response = self.client.request_content(&endpoint, path).await?;
        if let Some(error) = response.error {
            return Err(Error::daemon(error));
        }
        let output = response
            .output
            .ok_or_else(|| Error::daemon("daemon returned no content"))?;

        Ok(FetchStream::from_boxed(
            output,
            self.size_limit,
            FetchSource::Daemon,
        ))
    }
}

#[async_trait]
impl<C: DaemonClient> Fetcher for DaemonFetcher<C> {
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            stream = self.open(path) => stream,
        }
    }
}

/// Error body returned by the daemon RPC API.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Message")]
    message: String,
}

/// [`DaemonClient`] speaking the daemon's HTTP RPC API.
#[derive(Debug, Clone)]
pub struct KuboClient {
    http: Client,
    repo_dir: Option<PathBuf>,
}

impl KuboClient {
    /// Create a client reading its endpoint from `repo_dir`.
    pub fn new(repo_dir: Option<PathBuf>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create daemon client: {e}")))?;
        Ok(Self { http, repo_dir })
    }

    /// Create a client from the configured repository and timeout.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(
            config.daemon_repo_dir(),
            config.daemon_timeout(),
            &config.user_agent,
        )
    }
}

#[async_trait]
impl DaemonClient for KuboClient {
    async fn resolve_endpoint(&self) -> Result<String> {
        let repo = self
            .repo_dir
            .as_ref()
            .ok_or_else(|| Error::daemon("no daemon repository directory"))?;
        let api_file = repo.join(API_FILE);
        let contents = tokio::fs::read_to_string(&api_file)
            .await
            .map_err(|e| Error::daemon(format!("cannot read {}: {e}", api_file.display())))?;
        parse_api_endpoint(contents.trim())
    }

    async fn is_reachable(&self, endpoint: &str) -> bool {
        match self.http.post(format!("{endpoint}/api/v0/id")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(%endpoint, error = %e, "Daemon not reachable");
                false
            }
        }
    }

    async fn request_content(&self, endpoint: &str, path: &str) -> Result<DaemonResponse> {
        let response = self
            .http
            .post(format!("{endpoint}/api/v0/cat"))
            .query(&[("arg", path)])
            .send()
            .await
            .map_err(|e| Error::daemon(format!("cat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| format!("{status}: {}", body.trim()));
            return Ok(DaemonResponse::failed(message));
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(DaemonResponse::ok(Box::pin(StreamReader::new(body))))
    }
}

/// Convert the contents of the daemon `api` file to an HTTP base URL.
///
/// Accepts multiaddrs (`/ip4/127.0.0.1/tcp/5001`, `/ip6/::1/tcp/5001`,
/// `/dns4/localhost/tcp/5001`), `host:port` and `http(s)://` URLs.
pub fn parse_api_endpoint(addr: &str) -> Result<String> {
    let addr = addr.trim();
    if addr.starts_with("http://") || addr.starts_with("https://") {
        return Ok(addr.trim_end_matches('/').to_string());
    }
    if !addr.starts_with('/') {
        if addr.is_empty() {
            return Err(Error::daemon("empty daemon api address"));
        }
        return Ok(format!("http://{addr}"));
    }

    let parts: Vec<&str> = addr.split('/').skip(1).collect();
    let [proto, host, "tcp", port, ..] = parts.as_slice() else {
        return Err(Error::daemon(format!("unsupported daemon api address '{addr}'")));
    };
    let port: u16 = port
        .parse()
        .map_err(|_| Error::daemon(format!("invalid port in daemon api address '{addr}'")))?;

    let host = match *proto {
        "ip4" | "dns" | "dns4" | "dns6" => (*host).to_string(),
        "ip6" => format!("[{host}]"),
        _ => {
            return Err(Error::daemon(format!(
                "unsupported daemon api address '{addr}'"
            )));
        }
    };
    Ok(format!("http://{host}:{port}"))
}
