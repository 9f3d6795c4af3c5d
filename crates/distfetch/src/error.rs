//! Error types for distribution fetch operations.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for distribution fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, fetching or installing a binary.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The version listing of a distribution could not be read.
    #[error("could not read versions of '{dist}': {message}")]
    #[diagnostic(code(distfetch::versions::read))]
    Read {
        /// Distribution name.
        dist: String,
        /// Underlying cause.
        message: String,
    },

    /// No version satisfied the selection.
    #[error("no suitable version of '{dist}' found: {message}")]
    #[diagnostic(
        code(distfetch::versions::not_found),
        help("Run `distfetch versions <dist>` to list what the distribution publishes")
    )]
    NotFound {
        /// Distribution name.
        dist: String,
        /// What was being looked for.
        message: String,
    },

    /// Every transport failed; carries the failure of the last attempt.
    #[error("failed to fetch {target}: {message}")]
    #[diagnostic(code(distfetch::transport))]
    Transport {
        /// URL or logical path that was requested.
        target: String,
        /// Underlying cause.
        message: String,
    },

    /// The local daemon could not serve the request.
    #[error("local daemon unavailable: {0}")]
    #[diagnostic(code(distfetch::transport::daemon))]
    Daemon(String),

    /// The output path is occupied by something that is not a directory.
    #[error("output path {} already exists", path.display())]
    #[diagnostic(
        code(distfetch::install::already_exists),
        help("Remove the file or pass a directory as the output path")
    )]
    AlreadyExists {
        /// The occupied path.
        path: PathBuf,
    },

    /// Filesystem failure.
    #[error("I/O {operation} failed on {}: {source}", path.display())]
    #[diagnostic(
        code(distfetch::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// Operation that failed (e.g. "create", "rename").
        operation: &'static str,
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The expected binary could not be extracted from the archive.
    #[error("failed to extract '{binary}' from archive: {message}")]
    #[diagnostic(code(distfetch::install::extract))]
    Extract {
        /// Binary entry name.
        binary: String,
        /// Underlying cause.
        message: String,
    },

    /// A probe command could not be launched.
    #[error("failed to run `{command}`: {source}")]
    #[diagnostic(code(distfetch::platform::exec))]
    Exec {
        /// The command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    #[diagnostic(code(distfetch::cancelled))]
    Cancelled,

    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    #[diagnostic(code(distfetch::config))]
    Config(String),
}

impl Error {
    /// Create a version listing read error.
    #[must_use]
    pub fn read(dist: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            dist: dist.into(),
            message: message.into(),
        }
    }

    /// Create a version not found error.
    #[must_use]
    pub fn not_found(dist: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            dist: dist.into(),
            message: message.into(),
        }
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a daemon error.
    #[must_use]
    pub fn daemon(message: impl Into<String>) -> Self {
        Self::Daemon(message.into())
    }

    /// Create an I/O error with operation and path context.
    #[must_use]
    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an extraction error.
    #[must_use]
    pub fn extract(binary: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extract {
            binary: binary.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the error was caused by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
