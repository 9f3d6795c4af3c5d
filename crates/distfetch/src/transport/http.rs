//! HTTP gateway transport.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchSource, FetchStream, Fetcher, read_error_body};
use crate::config::FetchConfig;
use crate::{Error, Result};

/// Fetches logical paths from an HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    size_limit: u64,
}

impl HttpFetcher {
    /// Create a fetcher for `base_url`.
    pub fn new(base_url: &str, user_agent: &str, size_limit: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            size_limit,
        })
    }

    /// Create a fetcher for the configured gateway.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(&config.gateway_url, &config.user_agent, config.size_limit)
    }

    /// URL of a logical path on the gateway.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream> {
        let url = self.url_for(path);
        debug!(%url, "Fetching over HTTP");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(&url).send() => response,
        }
        .map_err(|e| Error::transport(&url, format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                body = read_error_body(response) => body,
            }
            .map_err(|e| {
                Error::transport(&url, format!("{status}: error reading error body: {e}"))
            })?;
            return Err(Error::transport(
                &url,
                format!("GET {url} error: {status}: {}", body.trim()),
            ));
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(FetchStream::new(
            StreamReader::new(body),
            self.size_limit,
            FetchSource::Http,
        ))
    }
}
