//! Installing a binary out of a fetched release archive.
//!
//! The archive is staged in a fresh hidden directory beside the output, the
//! binary entry is extracted next to it, made executable, and only then
//! renamed to the output path. The staging directory is removed on every exit
//! path.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extract::extract_binary;
use crate::platform::{ArchiveFormat, PlatformId};
use crate::transport::{FetchSource, FetchStream};
use crate::{Error, Result};

/// One fetch-and-install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionTarget {
    dist: String,
    version: String,
    archive_base: Option<String>,
    binary_base: Option<String>,
    output: PathBuf,
}

impl DistributionTarget {
    /// Install `version` of `dist` to `output` (a file path or a directory).
    #[must_use]
    pub fn new(
        dist: impl Into<String>,
        version: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dist: dist.into(),
            version: version.into(),
            archive_base: None,
            binary_base: None,
            output: output.into(),
        }
    }

    /// Archive base name, when it differs from the distribution name.
    #[must_use]
    pub fn with_archive_base(mut self, name: impl Into<String>) -> Self {
        self.archive_base = Some(name.into());
        self
    }

    /// Binary base name, when it differs from the archive base name.
    ///
    /// The `go-ipfs` archive, for example, contains a binary named `ipfs`.
    #[must_use]
    pub fn with_binary_base(mut self, name: impl Into<String>) -> Self {
        self.binary_base = Some(name.into());
        self
    }

    /// Same target with a different version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Distribution name.
    #[must_use]
    pub fn dist(&self) -> &str {
        &self.dist
    }

    /// Requested version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Archive base name; defaults to the distribution name.
    #[must_use]
    pub fn archive_base(&self) -> &str {
        self.archive_base.as_deref().unwrap_or(&self.dist)
    }

    /// Binary base name; defaults to the archive base name.
    #[must_use]
    pub fn binary_base(&self) -> &str {
        self.binary_base
            .as_deref()
            .unwrap_or_else(|| self.archive_base())
    }

    /// Requested output path.
    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// Where the installed binary ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDisposition {
    /// The output path does not exist yet and becomes the binary.
    NewFile(PathBuf),
    /// The output path is a directory; the binary goes inside it.
    InDirectory(PathBuf),
}

impl OutputDisposition {
    /// Decide where `binary` is written for the requested `output`.
    pub fn resolve(output: &Path, binary: &str) -> Result<Self> {
        match std::fs::metadata(output) {
            Ok(meta) if meta.is_dir() => Ok(Self::InDirectory(output.join(binary))),
            Ok(_) => Err(Error::AlreadyExists {
                path: output.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::NewFile(output.to_path_buf()))
            }
            Err(e) => Err(Error::io("stat", output, e)),
        }
    }

    /// Final path of the binary.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NewFile(path) | Self::InDirectory(path) => path,
        }
    }

    /// Directory that receives the binary.
    #[must_use]
    pub fn parent(&self) -> &Path {
        match self.path().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

/// An installed binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    /// Path of the executable.
    pub path: PathBuf,
    /// Transport the archive came from.
    pub source: FetchSource,
    /// Size of the downloaded archive.
    pub archive_bytes: u64,
}

/// Installs binaries out of release archives for one platform.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    platform: PlatformId,
}

impl ArchiveInstaller {
    /// Create an installer for archives built for `platform`.
    #[must_use]
    pub const fn new(platform: PlatformId) -> Self {
        Self { platform }
    }

    /// Platform the installer selects archives for.
    #[must_use]
    pub const fn platform(&self) -> &PlatformId {
        &self.platform
    }

    /// Archive format for the platform.
    #[must_use]
    pub fn archive_format(&self) -> ArchiveFormat {
        self.platform.archive_format()
    }

    /// Binary entry name inside the archive, platform-suffixed.
    #[must_use]
    pub fn binary_name(&self, target: &DistributionTarget) -> String {
        self.platform.exe_name(target.binary_base())
    }

    /// File name of the release archive for `target`.
    #[must_use]
    pub fn archive_name(&self, target: &DistributionTarget) -> String {
        self.platform.archive_name(
            target.archive_base(),
            target.version(),
            self.archive_format(),
        )
    }

    /// Resolve the output path and create the staging directory.
    ///
    /// Staging lives next to the output so the final rename stays on one
    /// filesystem.
    pub fn prepare(&self, target: &DistributionTarget) -> Result<PreparedInstall> {
        let binary_name = self.binary_name(target);
        let disposition = OutputDisposition::resolve(target.output(), &binary_name)?;

        let parent = disposition.parent();
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-", target.archive_base()))
            .tempdir_in(parent)
            .map_err(|e| Error::io("create staging directory", parent, e))?;
        debug!(staging = ?staging.path(), output = ?disposition.path(), "Prepared install");

        Ok(PreparedInstall {
            staging,
            disposition,
            dist: target.dist().to_string(),
            archive_name: self.archive_name(target),
            binary_name,
            format: self.archive_format(),
        })
    }

    /// Install the binary of `target` out of the archive in `stream`.
    pub async fn install(
        &self,
        stream: FetchStream,
        target: &DistributionTarget,
        cancel: &CancellationToken,
    ) -> Result<InstallResult> {
        self.prepare(target)?.install(stream, cancel).await
    }
}

/// An install whose output path is resolved and whose staging area exists.
#[derive(Debug)]
pub struct PreparedInstall {
    staging: TempDir,
    disposition: OutputDisposition,
    dist: String,
    archive_name: String,
    binary_name: String,
    format: ArchiveFormat,
}

impl PreparedInstall {
    /// Where the binary will be written.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        self.disposition.path()
    }

    /// Release archive file name.
    #[must_use]
    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Staging directory, removed when the install finishes.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Stage the archive from `stream`, extract the binary and move it into place.
    pub async fn install(
        self,
        mut stream: FetchStream,
        cancel: &CancellationToken,
    ) -> Result<InstallResult> {
        let archive_path = self.staging.path().join(&self.archive_name);
        let archive_bytes = stage_archive(&mut stream, &archive_path, cancel).await?;
        let source = stream.source();
        let truncated = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            truncated = stream.is_truncated() => truncated,
        };
        match truncated {
            Ok(true) => warn!(
                limit = stream.limit(),
                archive = %self.archive_name,
                "Archive exceeded the size limit, remaining data was discarded"
            ),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Could not check for data past the size limit"),
        }
        stream.close();

        let staged_dir = self.staging.path().join("out");
        std::fs::create_dir(&staged_dir).map_err(|e| Error::io("create", &staged_dir, e))?;
        let staged_binary = staged_dir.join(&self.binary_name);

        extract_binary(
            &archive_path,
            self.format,
            &self.dist,
            &self.binary_name,
            &staged_binary,
        )?;
        set_executable(&staged_binary)?;

        let output = self.disposition.path().to_path_buf();
        move_into_place(&staged_binary, &output)?;

        if let Err(e) = self.staging.close() {
            warn!(error = %e, "Failed to remove staging directory");
        }

        info!(binary = ?output, %source, archive_bytes, "Installed binary");
        Ok(InstallResult {
            path: output,
            source,
            archive_bytes,
        })
    }
}

/// Copy the fetched archive to `path`, returning the number of bytes written.
async fn stage_archive(
    stream: &mut FetchStream,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io("create", path, e))?;

    let copied = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(Error::Cancelled),
        copied = tokio::io::copy(stream, &mut file) => copied,
    }
    .map_err(|e| Error::io("download", path, e))?;

    file.flush().await.map_err(|e| Error::io("write", path, e))?;
    debug!(?path, bytes = copied, "Staged archive");
    Ok(copied)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| Error::io("stat", path, e))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).map_err(|e| Error::io("chmod", path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Rename the staged binary onto `dest`. `dest` is never written partially.
fn move_into_place(staged: &Path, dest: &Path) -> Result<()> {
    std::fs::rename(staged, dest).map_err(|e| Error::io("rename", dest, e))
}
