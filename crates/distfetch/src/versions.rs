//! Version discovery over a distribution's `versions` listing.
//!
//! The listing holds one version per line, usually `v`-prefixed. Lines that
//! do not parse as semantic versions are skipped rather than failing the
//! listing, so minor format drift upstream does not break discovery.

use semver::Version;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::platform::DistLayout;
use crate::transport::Fetcher;
use crate::{Error, Result};

/// Prefix stripped from, and restored to, every listed version.
pub const VERSION_PREFIX: char = 'v';

/// Marker identifying development builds.
pub const DEV_MARKER: &str = "-dev";

/// Parse a version listing.
///
/// Returns the valid versions, `v`-prefixed, in ascending semantic-version
/// order, or the exact reverse when `descending` is set. Build metadata does
/// not affect ordering and equal versions keep their listing order.
#[must_use]
pub fn parse_versions<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    descending: bool,
) -> Vec<String> {
    let mut versions: Vec<Version> = lines
        .into_iter()
        .filter_map(|line| {
            let token = line.trim().trim_start_matches(VERSION_PREFIX);
            match Version::parse(token) {
                Ok(version) => Some(version),
                Err(e) => {
                    if !line.trim().is_empty() {
                        trace!(%line, error = %e, "Skipping unparseable version");
                    }
                    None
                }
            }
        })
        .collect();

    versions.sort_by(Version::cmp_precedence);
    if descending {
        versions.reverse();
    }

    versions
        .iter()
        .map(|version| format!("{VERSION_PREFIX}{version}"))
        .collect()
}

/// Newest entry of an ascending listing that is not a development build.
#[must_use]
pub fn select_latest_stable(ascending: &[String]) -> Option<&str> {
    ascending
        .iter()
        .rev()
        .find(|version| !version.contains(DEV_MARKER))
        .map(String::as_str)
}

/// Lists and selects versions of distributions.
pub struct VersionCatalog<'a> {
    fetcher: &'a dyn Fetcher,
    layout: &'a DistLayout,
}

impl<'a> VersionCatalog<'a> {
    /// Create a catalog reading listings through `fetcher`.
    #[must_use]
    pub fn new(fetcher: &'a dyn Fetcher, layout: &'a DistLayout) -> Self {
        Self { fetcher, layout }
    }

    /// All published versions of `dist`, ascending unless `descending`.
    pub async fn list_versions(
        &self,
        dist: &str,
        descending: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let path = self.layout.versions_path(dist);
        debug!(%dist, %path, "Listing versions");

        let mut stream = self
            .fetcher
            .fetch(&path, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::read(dist, other.to_string()),
            })?;

        let mut lines = Vec::new();
        {
            let mut reader = BufReader::new(&mut stream).lines();
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    next = reader.next_line() => next,
                };
                match next.map_err(|e| Error::read(dist, e.to_string()))? {
                    Some(line) => lines.push(line),
                    None => break,
                }
            }
        }
        stream.close();

        let versions = parse_versions(lines.iter().map(String::as_str), descending);
        debug!(%dist, count = versions.len(), "Listed versions");
        Ok(versions)
    }

    /// Newest version of `dist` that is not a development build.
    pub async fn latest_stable(&self, dist: &str, cancel: &CancellationToken) -> Result<String> {
        let versions = self.list_versions(dist, false, cancel).await?;
        select_latest_stable(&versions)
            .map(str::to_string)
            .ok_or_else(|| Error::not_found(dist, "could not find a non dev version"))
    }
}
