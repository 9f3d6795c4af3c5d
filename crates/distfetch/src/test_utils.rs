//! Shared test utilities for distfetch tests.
//!
//! Archive builders, an in-memory [`Fetcher`] and a one-shot loopback HTTP
//! server for exercising the real transports.

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{FetchSource, FetchStream, Fetcher};
use crate::{Error, Result};

/// Build a gzip-compressed tarball in memory.
pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// Build a zip archive in memory.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    for (path, content) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(content).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// In-memory [`Fetcher`] serving fixed bodies by logical path.
#[derive(Default)]
pub struct StaticFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    /// Create an empty fetcher; every path is a transport error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `path`.
    pub fn with(self, path: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), body.into());
        self
    }

    /// Number of fetches performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Paths requested so far, in order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(path.to_string());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.bodies.lock().unwrap().get(path) {
            Some(body) => Ok(FetchStream::new(
                Cursor::new(body.clone()),
                u64::MAX,
                FetchSource::Http,
            )),
            None => Err(Error::transport(path, "404 Not Found")),
        }
    }
}

/// Format a raw HTTP/1.1 response.
pub fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Serve a single canned response on a loopback port.
///
/// Returns the base URL and a handle resolving to the raw request head.
pub async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        // The client may stop reading early.
        socket.write_all(&response).await.ok();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).into_owned()
    });

    (format!("http://{addr}"), handle)
}
