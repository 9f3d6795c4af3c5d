//! Platform detection and distribution naming.
//!
//! Archive names on the distribution use Go-style OS and architecture names
//! (`darwin`, `amd64`, ...), so the host values reported by Rust are mapped
//! before use. On Linux the C library is probed so musl hosts get the
//! `linux-musl` variant.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Shell command whose combined output names the host C library.
///
/// glibc prints its banner on stdout; musl does not know `--version`, prints
/// on stderr and exits non-zero, hence the `|| true`.
pub const LIBC_PROBE: &str = "ldd --version || true";

/// Archive container used for a platform's release archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// gzip-compressed tarball.
    TarGz,
    /// zip archive.
    Zip,
}

impl ArchiveFormat {
    /// Archive format published for the given OS.
    #[must_use]
    pub fn for_os(os: &str) -> Self {
        if os == "windows" { Self::Zip } else { Self::TarGz }
    }

    /// File extension, without the leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Host OS in distribution naming.
#[must_use]
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host architecture in distribution naming.
#[must_use]
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// OS, architecture and OS variant of a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformId {
    /// Operating system (`linux`, `darwin`, `windows`, ...).
    pub os: String,
    /// Architecture (`amd64`, `arm64`, ...).
    pub arch: String,
    /// OS name qualified by the C library: `linux-musl`, otherwise the OS itself.
    pub os_variant: String,
}

impl PlatformId {
    /// Create a platform whose variant is the OS itself.
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        let os = os.into();
        Self {
            os_variant: os.clone(),
            os,
            arch: arch.into(),
        }
    }

    /// Create a Linux platform linked against musl.
    #[must_use]
    pub fn linux_musl(arch: impl Into<String>) -> Self {
        Self {
            os: "linux".to_string(),
            arch: arch.into(),
            os_variant: "linux-musl".to_string(),
        }
    }

    /// Detect the host platform, probing the C library on Linux.
    pub async fn detect(runner: &dyn ProcessRunner, cancel: &CancellationToken) -> Result<Self> {
        Self::detect_for(host_os(), host_arch(), runner, cancel).await
    }

    /// Detect the variant of the given OS and architecture.
    pub async fn detect_for(
        os: &str,
        arch: &str,
        runner: &dyn ProcessRunner,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        if os != "linux" {
            return Ok(Self::new(os, arch));
        }

        let output = runner.run_shell(LIBC_PROBE, cancel).await?;
        if output.exit_ignored {
            trace!("libc probe exited non-zero, ignored");
        }

        let is_musl = output.combined.lines().any(|line| line.contains("musl"));
        let platform = if is_musl {
            Self::linux_musl(arch)
        } else {
            Self::new(os, arch)
        };
        debug!(%platform, "Detected platform");
        Ok(platform)
    }

    /// Whether the platform is Windows.
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Archive format published for this platform.
    #[must_use]
    pub fn archive_format(&self) -> ArchiveFormat {
        ArchiveFormat::for_os(&self.os)
    }

    /// Name of an executable on this platform.
    #[must_use]
    pub fn exe_name(&self, base: &str) -> String {
        if self.is_windows() && !base.ends_with(".exe") {
            format!("{base}.exe")
        } else {
            base.to_string()
        }
    }

    /// Compose a release archive name: `base_version_osv-arch.ext`.
    ///
    /// Example: `ipfs-10-to-11_v1.8.0_linux-amd64.tar.gz`
    #[must_use]
    pub fn archive_name(&self, base: &str, version: &str, format: ArchiveFormat) -> String {
        format!("{base}_{version}_{}-{}.{format}", self.os_variant, self.arch)
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os_variant, self.arch)
    }
}

/// Paths of distribution resources under a distribution root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistLayout {
    root: String,
}

impl DistLayout {
    /// File listing the published versions of a distribution.
    pub const VERSIONS_FILE: &'static str = "versions";

    /// Create a layout rooted at `root`.
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// The distribution root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// `root/dist/versions`
    #[must_use]
    pub fn versions_path(&self, dist: &str) -> String {
        format!("{}/{dist}/{}", self.root, Self::VERSIONS_FILE)
    }

    /// `root/dist/version/archive`
    #[must_use]
    pub fn dist_path(&self, dist: &str, version: &str, archive_name: &str) -> String {
        format!("{}/{dist}/{version}/{archive_name}", self.root)
    }
}

/// Combined output of a shell command whose exit status is not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr, lossily decoded.
    pub combined: String,
    /// Set when the command exited unsuccessfully and that was ignored.
    pub exit_ignored: bool,
}

/// Launches shell commands for platform probing.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `script` with `sh -c`.
    ///
    /// Only a failure to launch or wait for the process is an error; a
    /// non-zero exit is reported through [`CommandOutput::exit_ignored`].
    async fn run_shell(&self, script: &str, cancel: &CancellationToken) -> Result<CommandOutput>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run_shell(&self, script: &str, cancel: &CancellationToken) -> Result<CommandOutput> {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(script).kill_on_drop(true);

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            output = command.output() => output,
        }
        .map_err(|source| Error::Exec {
            command: format!("sh -c \"{script}\""),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            combined,
            exit_ignored: !output.status.success(),
        })
    }
}
