//! Size-bounded byte stream returned by every transport.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

/// Boxed async reader used for transport bodies.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Transport that produced a [`FetchStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchSource {
    /// Local daemon RPC.
    Daemon,
    /// HTTP gateway.
    Http,
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daemon => f.write_str("daemon"),
            Self::Http => f.write_str("http"),
        }
    }
}

/// An open byte stream that reports end-of-data after `limit` bytes.
///
/// The stream owns the underlying connection. It is released when the stream
/// is closed or dropped, whichever comes first, and never twice.
pub struct FetchStream {
    inner: Option<Take<BoxedReader>>,
    limit: u64,
    source: FetchSource,
}

impl FetchStream {
    /// Wrap a reader, capping it at `limit` bytes.
    #[must_use]
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        limit: u64,
        source: FetchSource,
    ) -> Self {
        Self::from_boxed(Box::pin(reader), limit, source)
    }

    /// Wrap an already boxed reader, capping it at `limit` bytes.
    #[must_use]
    pub fn from_boxed(reader: BoxedReader, limit: u64, source: FetchSource) -> Self {
        Self {
            inner: Some(reader.take(limit)),
            limit,
            source,
        }
    }

    /// Transport the stream came from.
    #[must_use]
    pub const fn source(&self) -> FetchSource {
        self.source
    }

    /// Maximum number of bytes the stream yields.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes handed out so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |inner| self.limit - inner.limit())
    }

    /// Whether all `limit` bytes have been handed out.
    ///
    /// A source of exactly `limit` bytes reaches the cap without losing data;
    /// use [`is_truncated`](Self::is_truncated) to tell the two apart.
    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.limit() == 0)
    }

    /// Whether the source holds more data than the cap let through.
    ///
    /// Only answers `true` once the cap is reached, by reading one byte past
    /// it from the source. That byte is discarded.
    pub async fn is_truncated(&mut self) -> io::Result<bool> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(false);
        };
        if inner.limit() > 0 {
            return Ok(false);
        }
        let mut extra = [0u8; 1];
        Ok(inner.get_mut().read(&mut extra).await? > 0)
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the underlying connection. Further reads report end-of-data.
    pub fn close(&mut self) {
        drop(self.inner.take());
    }
}

impl AsyncRead for FetchStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl fmt::Debug for FetchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStream")
            .field("source", &self.source)
            .field("limit", &self.limit)
            .field("bytes_read", &self.bytes_read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
