//! Command execution.
//!
//! Each command returns the text to print on stdout; rendering and exit codes
//! are left to `main`.

use distfetch::{Distribution, DistributionTarget, FetchConfig, PlatformId, ShellRunner};
use std::fmt::Write as _;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cli::{CliError, Commands};

/// Run `command` against the distribution described by `config`.
#[instrument(name = "distfetch_command", skip_all)]
pub async fn execute(
    command: &Commands,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<String, CliError> {
    match command {
        Commands::Platform => platform(cancel).await,
        Commands::Versions { dist, desc } => {
            let distribution = Distribution::from_config(config)?;
            let versions = distribution.list_versions(dist, *desc, cancel).await?;
            Ok(lines(&versions))
        }
        Commands::Latest { dist } => {
            let distribution = Distribution::from_config(config)?;
            let version = distribution.latest_stable(dist, cancel).await?;
            Ok(format!("{version}\n"))
        }
        Commands::Fetch {
            dist,
            output,
            version,
            archive_name,
            binary_name,
        } => {
            let distribution = Distribution::from_config(config)?;
            let version = distribution.resolve_version(dist, version, cancel).await?;
            let target = build_target(
                dist,
                &version,
                output,
                archive_name.as_deref(),
                binary_name.as_deref(),
            );

            let result = distribution.fetch_binary(&target, cancel).await?;
            info!(path = ?result.path, source = %result.source, "Fetch complete");
            Ok(format!("{}\n", result.path.display()))
        }
    }
}

async fn platform(cancel: &CancellationToken) -> Result<String, CliError> {
    let platform = PlatformId::detect(&ShellRunner, cancel).await?;
    Ok(format!("{platform}\n"))
}

fn build_target(
    dist: &str,
    version: &str,
    output: &Path,
    archive_name: Option<&str>,
    binary_name: Option<&str>,
) -> DistributionTarget {
    let mut target = DistributionTarget::new(dist, version, output);
    if let Some(name) = archive_name {
        target = target.with_archive_base(name);
    }
    if let Some(name) = binary_name {
        target = target.with_binary_base(name);
    }
    target
}

fn lines(items: &[String]) -> String {
    items.iter().fold(String::new(), |mut out, item| {
        let _ = writeln!(out, "{item}");
        out
    })
}
