//! distfetch command-line interface.

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;
mod tracing;

use ::tracing::{info, warn};
use cli::{CliError, EXIT_ERROR, EXIT_OK, exit_code_for, render_error};
use tokio_util::sync::CancellationToken;

use crate::tracing::{TracingConfig, init_tracing};

fn main() {
    // NOTE: eprintln! is used here because tracing may not be usable during a panic.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    std::process::exit(run_with_tokio(cli));
}

/// Create a single-threaded runtime; all operations run sequentially.
fn run_with_tokio(cli: cli::Cli) -> i32 {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            return EXIT_ERROR;
        }
    };

    rt.block_on(run(cli))
}

async fn run(cli: cli::Cli) -> i32 {
    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        ..Default::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("{e:?}");
        return EXIT_ERROR;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            signal_cancel.cancel();
        }
    });

    match real_main(&cli, &cancel).await {
        Ok(output) => {
            print!("{output}");
            EXIT_OK
        }
        Err(err) => {
            let code = exit_code_for(&err);
            render_error(err);
            code
        }
    }
}

async fn real_main(cli: &cli::Cli, cancel: &CancellationToken) -> Result<String, CliError> {
    let config = cli.fetch_config()?;
    info!(
        correlation_id = %crate::tracing::correlation_id(),
        gateway = %config.gateway_url,
        dist_root = %config.dist_root,
        use_daemon = config.use_daemon,
        "Starting distfetch"
    );
    commands::execute(&cli.command, &config, cancel).await
}
