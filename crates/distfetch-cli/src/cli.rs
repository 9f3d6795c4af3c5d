use clap::{Parser, Subcommand};
use distfetch::FetchConfig;
use miette::{Diagnostic, Report};
use std::path::PathBuf;
use thiserror::Error;

use crate::tracing::{LogLevel, TracingFormat};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Any failure
pub const EXIT_ERROR: i32 = 1;
/// Exit code for SIGINT (128 + signal number 2)
pub const EXIT_SIGINT: i32 = 130;

/// CLI-level error with exit code mapping
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid flags or configuration
    #[error("Configuration error: {message}")]
    #[diagnostic(code(distfetch::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Failure reported by the library
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] distfetch::Error),
}

impl CliError {
    /// Create a configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Map CLI error to the process exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Fetch(distfetch::Error::Cancelled) => EXIT_SIGINT,
        _ => EXIT_ERROR,
    }
}

/// Render an error with miette on stderr
#[allow(clippy::print_stderr)]
pub fn render_error(err: CliError) {
    let report = Report::new(err);
    eprintln!("{report:?}");
}

/// Fetch and install versioned binaries from a content-addressed distribution.
#[derive(Parser, Debug)]
#[command(name = "distfetch")]
#[command(about = "Fetch and install versioned binaries from a content-addressed distribution")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML).
    #[arg(long, global = true, env = "DISTFETCH_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Gateway URL used when the local daemon is unavailable.
    #[arg(long, global = true, value_name = "URL")]
    pub gateway: Option<String>,

    /// Distribution root path.
    #[arg(long, global = true, value_name = "PATH")]
    pub dist_root: Option<String>,

    /// Skip the local daemon and always use the gateway.
    #[arg(long, global = true)]
    pub no_daemon: bool,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long = "log-level",
        global = true,
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List the published versions of a distribution.
    Versions {
        /// Distribution name.
        dist: String,
        /// Newest first.
        #[arg(long)]
        desc: bool,
    },
    /// Print the newest version that is not a development build.
    Latest {
        /// Distribution name.
        dist: String,
    },
    /// Print the platform identifier used in archive names.
    Platform,
    /// Fetch a release archive and install its binary.
    Fetch {
        /// Distribution name.
        dist: String,
        /// Output file, or an existing directory to install into.
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
        /// Version to install, or `latest`.
        #[arg(long, default_value = distfetch::LATEST)]
        version: String,
        /// Archive base name, when it differs from the distribution name.
        #[arg(long)]
        archive_name: Option<String>,
        /// Binary name inside the archive, when it differs from the archive name.
        #[arg(long)]
        binary_name: Option<String>,
    },
}

impl Cli {
    /// Build the fetch configuration: file, then environment, then flags.
    pub fn fetch_config(&self) -> Result<FetchConfig, CliError> {
        let base = match &self.config {
            Some(path) => FetchConfig::load(path)?,
            None => FetchConfig::default(),
        };
        self.apply_flags(base.with_env_overrides())
    }

    fn apply_flags(&self, mut config: FetchConfig) -> Result<FetchConfig, CliError> {
        if let Some(gateway) = &self.gateway {
            config.gateway_url.clone_from(gateway);
        }
        if let Some(root) = &self.dist_root {
            config.dist_root.clone_from(root);
        }
        if self.no_daemon {
            config.use_daemon = false;
        }
        config.validate().map_err(|e| {
            CliError::config_with_help(
                e.to_string(),
                "Run 'distfetch --help' to see available options",
            )
        })?;
        Ok(config)
    }
}

/// Parse command-line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
