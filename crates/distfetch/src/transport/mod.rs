//! Transports that resolve logical distribution paths to byte streams.
//!
//! The local daemon is tried first; any failure other than cancellation falls
//! back to the HTTP gateway exactly once.

mod daemon;
mod http;
mod stream;

pub use daemon::{
    API_FILE, DaemonClient, DaemonFetcher, DaemonResponse, KuboClient, parse_api_endpoint,
};
pub use http::HttpFetcher;
pub use stream::{BoxedReader, FetchSource, FetchStream};

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::{Error, Result};

/// Bytes of an error response body kept for the error message.
pub(crate) const ERROR_BODY_LIMIT: u64 = 64 * 1024;

/// Read at most [`ERROR_BODY_LIMIT`] bytes of an error response body.
pub(crate) async fn read_error_body(response: reqwest::Response) -> std::io::Result<String> {
    let body = response.bytes_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(body).take(ERROR_BODY_LIMIT);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Opens a bounded byte stream for a logical path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Open the resource at `path`. The caller owns the returned stream.
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream>;
}

/// Daemon-first transport with an HTTP fallback.
pub struct FallbackTransport {
    primary: Option<Box<dyn Fetcher>>,
    fallback: Box<dyn Fetcher>,
}

impl FallbackTransport {
    /// Try `primary` first, then `fallback`.
    #[must_use]
    pub fn new(primary: Box<dyn Fetcher>, fallback: Box<dyn Fetcher>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    /// Use `fallback` only.
    #[must_use]
    pub fn fallback_only(fallback: Box<dyn Fetcher>) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    /// Build the local daemon and gateway transports from configuration.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let http = Box::new(HttpFetcher::from_config(config)?);
        if !config.use_daemon {
            return Ok(Self::fallback_only(http));
        }
        let daemon = DaemonFetcher::new(KuboClient::from_config(config)?, config.size_limit);
        Ok(Self::new(Box::new(daemon), http))
    }
}

#[async_trait]
impl Fetcher for FallbackTransport {
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream> {
        if let Some(primary) = &self.primary {
            match primary.fetch(path, cancel).await {
                Ok(stream) => {
                    info!(source = %stream.source(), %path, "Using local daemon for transfer");
                    return Ok(stream);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => debug!(error = %e, %path, "Local daemon unavailable, falling back"),
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let stream = self.fallback.fetch(path, cancel).await?;
        info!(source = %stream.source(), %path, "Using gateway for transfer");
        Ok(stream)
    }
}
