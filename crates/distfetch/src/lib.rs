//! Fetch and install versioned binaries from a content-addressed distribution.
//!
//! A distribution publishes, per named program, a `versions` listing and one
//! release archive per version and platform:
//!
//! ```text
//! <root>/<dist>/versions
//! <root>/<dist>/<version>/<dist>_<version>_<os>-<arch>.<tar.gz|zip>
//! ```
//!
//! Resources are read through a local daemon when one is running and through
//! an HTTP gateway otherwise. [`Distribution`] wires version discovery,
//! platform naming, transport and installation together.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extract;
pub mod install;
pub mod platform;
pub mod transport;
pub mod versions;

#[cfg(test)]
mod test_utils;

pub use config::FetchConfig;
pub use error::{Error, Result};
pub use install::{ArchiveInstaller, DistributionTarget, InstallResult, OutputDisposition};
pub use platform::{ArchiveFormat, DistLayout, PlatformId, ProcessRunner, ShellRunner};
pub use transport::{FallbackTransport, FetchSource, FetchStream, Fetcher};
pub use versions::VersionCatalog;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Version requested to mean the newest non-development release.
pub const LATEST: &str = "latest";

/// A distribution reachable through one transport, seen from one platform.
///
/// The host platform is detected on first use, so version queries never run
/// the detection command.
pub struct Distribution {
    transport: Box<dyn Fetcher>,
    layout: DistLayout,
    runner: Box<dyn ProcessRunner>,
    installer: OnceCell<ArchiveInstaller>,
}

impl Distribution {
    /// Create a distribution for a known platform.
    #[must_use]
    pub fn new(transport: Box<dyn Fetcher>, layout: DistLayout, platform: PlatformId) -> Self {
        Self {
            transport,
            layout,
            runner: Box::new(ShellRunner),
            installer: OnceCell::from(ArchiveInstaller::new(platform)),
        }
    }

    /// Create a distribution that detects the host platform through `runner`
    /// the first time it is needed.
    #[must_use]
    pub fn with_runner(
        transport: Box<dyn Fetcher>,
        layout: DistLayout,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        Self {
            transport,
            layout,
            runner,
            installer: OnceCell::new(),
        }
    }

    /// Build the daemon and gateway transports from `config`.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        config.validate()?;
        let transport = FallbackTransport::from_config(config)?;
        debug!(root = %config.dist_root, gateway = %config.gateway_url, "Distribution ready");
        Ok(Self::with_runner(
            Box::new(transport),
            config.layout(),
            Box::new(ShellRunner),
        ))
    }

    async fn installer(&self, cancel: &CancellationToken) -> Result<&ArchiveInstaller> {
        self.installer
            .get_or_try_init(|| async {
                let platform = PlatformId::detect(self.runner.as_ref(), cancel).await?;
                debug!(%platform, "Detected host platform");
                Ok::<_, Error>(ArchiveInstaller::new(platform))
            })
            .await
    }

    /// Platform archives are selected for, detecting it if needed.
    pub async fn platform(&self, cancel: &CancellationToken) -> Result<&PlatformId> {
        Ok(self.installer(cancel).await?.platform())
    }

    /// Path layout of the distribution.
    #[must_use]
    pub fn layout(&self) -> &DistLayout {
        &self.layout
    }

    /// Version catalog reading through this distribution's transport.
    #[must_use]
    pub fn catalog(&self) -> VersionCatalog<'_> {
        VersionCatalog::new(self.transport.as_ref(), &self.layout)
    }

    /// All published versions of `dist`, ascending unless `descending`.
    pub async fn list_versions(
        &self,
        dist: &str,
        descending: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.catalog().list_versions(dist, descending, cancel).await
    }

    /// Newest version of `dist` that is not a development build.
    pub async fn latest_stable(&self, dist: &str, cancel: &CancellationToken) -> Result<String> {
        self.catalog().latest_stable(dist, cancel).await
    }

    /// Turn a requested version into a published version string.
    ///
    /// [`LATEST`] resolves through the catalog; anything else is taken as
    /// given, with the `v` prefix added when missing.
    pub async fn resolve_version(
        &self,
        dist: &str,
        requested: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let requested = requested.trim();
        if requested.eq_ignore_ascii_case(LATEST) {
            let version = self.latest_stable(dist, cancel).await?;
            info!(%dist, %version, "Resolved latest version");
            return Ok(version);
        }
        if requested.starts_with(versions::VERSION_PREFIX) {
            Ok(requested.to_string())
        } else {
            Ok(format!("{}{requested}", versions::VERSION_PREFIX))
        }
    }

    /// Name of the release archive for `target` on this platform.
    pub async fn archive_name(
        &self,
        target: &DistributionTarget,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.installer(cancel).await?.archive_name(target))
    }

    /// Fetch the release archive of `target` and install its binary.
    ///
    /// The output path is checked before any request is made, so an occupied
    /// path fails without network traffic.
    pub async fn fetch_binary(
        &self,
        target: &DistributionTarget,
        cancel: &CancellationToken,
    ) -> Result<InstallResult> {
        let prepared = self.installer(cancel).await?.prepare(target)?;
        let path = self
            .layout
            .dist_path(target.dist(), target.version(), prepared.archive_name());
        info!(dist = %target.dist(), version = %target.version(), %path, "Fetching binary");

        let stream = self.transport.fetch(&path, cancel).await?;
        prepared.install(stream, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::platform::CommandOutput;
    use crate::test_utils::{StaticFetcher, tar_gz_bytes};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ROOT: &str = "/ipns/dist.ipfs.io";

    struct Shared(Arc<StaticFetcher>);

    #[async_trait]
    impl Fetcher for Shared {
        async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<FetchStream> {
            self.0.fetch(path, cancel).await
        }
    }

    /// Runner that reports a glibc host and counts invocations.
    #[derive(Default)]
    struct CountingRunner(Arc<AtomicUsize>);

    #[async_trait]
    impl ProcessRunner for CountingRunner {
        async fn run_shell(&self, _: &str, _: &CancellationToken) -> Result<CommandOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                combined: "ldd (GNU libc) 2.31".to_string(),
                exit_ignored: false,
            })
        }
    }

    fn detecting_distribution(fetcher: StaticFetcher) -> (Distribution, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let dist = Distribution::with_runner(
            Box::new(fetcher),
            DistLayout::new(ROOT),
            Box::new(CountingRunner(Arc::clone(&runs))),
        );
        (dist, runs)
    }

    fn distribution(fetcher: StaticFetcher) -> (Distribution, Arc<StaticFetcher>) {
        let fetcher = Arc::new(fetcher);
        let dist = Distribution::new(
            Box::new(Shared(Arc::clone(&fetcher))),
            DistLayout::new(ROOT),
            PlatformId::new("linux", "amd64"),
        );
        (dist, fetcher)
    }

    #[tokio::test]
    async fn test_fetch_binary_end_to_end() {
        let out = TempDir::new().unwrap();
        let archive = tar_gz_bytes(&[
            ("ipfs-10-to-11/ipfs-10-to-11", b"migration"),
            ("ipfs-10-to-11/README.md", b"readme"),
        ]);
        let archive_path = format!(
            "{ROOT}/ipfs-10-to-11/v1.8.0/ipfs-10-to-11_v1.8.0_linux-amd64.tar.gz"
        );
        let (dist, fetcher) = distribution(StaticFetcher::new().with(&archive_path, archive));

        let target = DistributionTarget::new("ipfs-10-to-11", "v1.8.0", out.path());
        let result = dist
            .fetch_binary(&target, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.path, out.path().join("ipfs-10-to-11"));
        assert_eq!(std::fs::read(&result.path).unwrap(), b"migration");
        assert_eq!(fetcher.requested(), vec![archive_path]);
    }

    #[tokio::test]
    async fn test_fetch_binary_existing_file_makes_no_request() {
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ipfs");
        std::fs::write(&dest, b"old").unwrap();
        let (dist, fetcher) = distribution(StaticFetcher::new());

        let err = dist
            .fetch_binary(
                &DistributionTarget::new("go-ipfs", "v0.7.0", &dest),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_binary_transport_failure_leaves_no_output() {
        let out = TempDir::new().unwrap();
        let (dist, _) = distribution(StaticFetcher::new());

        let err = dist
            .fetch_binary(
                &DistributionTarget::new("go-ipfs", "v0.7.0", out.path()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_version() {
        let (dist, fetcher) = distribution(
            StaticFetcher::new()
                .with(&format!("{ROOT}/go-ipfs/versions"), "v0.6.0\nv0.7.0\nv0.8.0-dev\n"),
        );
        let cancel = CancellationToken::new();

        assert_eq!(dist.resolve_version("go-ipfs", "latest", &cancel).await.unwrap(), "v0.7.0");
        assert_eq!(dist.resolve_version("go-ipfs", "LATEST", &cancel).await.unwrap(), "v0.7.0");
        assert_eq!(fetcher.calls(), 2);

        assert_eq!(dist.resolve_version("go-ipfs", "v0.5.0", &cancel).await.unwrap(), "v0.5.0");
        assert_eq!(dist.resolve_version("go-ipfs", "0.5.0", &cancel).await.unwrap(), "v0.5.0");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_versions_through_facade() {
        let (dist, _) = distribution(
            StaticFetcher::new().with(&format!("{ROOT}/go-ipfs/versions"), "v0.2.0\nv0.1.0\n"),
        );
        let versions = dist
            .list_versions("go-ipfs", true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(versions, vec!["v0.2.0", "v0.1.0"]);
    }

    #[tokio::test]
    async fn test_archive_name_uses_platform() {
        let (dist, _) = distribution(StaticFetcher::new());
        let cancel = CancellationToken::new();
        let target = DistributionTarget::new("go-ipfs", "v0.7.0", "/tmp/out");
        assert_eq!(
            dist.archive_name(&target, &cancel).await.unwrap(),
            "go-ipfs_v0.7.0_linux-amd64.tar.gz"
        );
        assert_eq!(dist.platform(&cancel).await.unwrap().to_string(), "linux-amd64");
        assert_eq!(dist.layout().root(), ROOT);
    }

    #[tokio::test]
    async fn test_version_queries_skip_platform_detection() {
        let listing = format!("{ROOT}/go-ipfs/versions");
        let (dist, runs) =
            detecting_distribution(StaticFetcher::new().with(&listing, "v0.6.0\nv0.7.0\n"));
        let cancel = CancellationToken::new();

        dist.list_versions("go-ipfs", false, &cancel).await.unwrap();
        dist.latest_stable("go-ipfs", &cancel).await.unwrap();
        dist.resolve_version("go-ipfs", "latest", &cancel).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_platform_is_detected_once() {
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ipfs");
        std::fs::write(&dest, b"old").unwrap();
        let (dist, runs) = detecting_distribution(StaticFetcher::new());
        let target = DistributionTarget::new("go-ipfs", "v0.7.0", &dest);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let err = dist.fetch_binary(&target, &cancel).await.unwrap_err();
            assert!(matches!(err, Error::AlreadyExists { .. }));
        }
        assert_eq!(dist.platform(&cancel).await.unwrap().os_variant, "linux");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
