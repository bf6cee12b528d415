mod cli;
mod commands;
mod format;

use std::process::ExitCode;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use certswap_common::paths::{artifact_timestamp, run_log_path};
use cli::{Cli, Command};

const PROMPT_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<u8> {
    let cli = Cli::parse();

    // ── Synchronous subcommands (no runtime, no log file) ───────────
    if matches!(cli.command, Command::ApiKeyHelp) {
        format::api_key_help();
        return Ok(0);
    }

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_file = run_log_path(&cli.log_dir, &artifact_timestamp(Local::now()));
    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, &log_file)?;
    tracing::info!(
        "certswap v{} starting, run log {}",
        env!("CARGO_PKG_VERSION"),
        log_file.display()
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async_main(cli));
    // A prompt abandoned by Ctrl+C still blocks on stdin.
    rt.shutdown_timeout(PROMPT_SHUTDOWN_GRACE);
    result
}

async fn async_main(cli: Cli) -> anyhow::Result<u8> {
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match &cli.command {
        Command::Rotate(args) => commands::rotate::rotate(args, &cli, cancel).await,
        Command::Certs(args) => commands::certs::certs(args, &cli).await,
        Command::Backup(args) => commands::backup::backup(args, &cli).await,
        Command::ApiKeyHelp => Ok(0),
    }
}

/// Ctrl+C cancels the run: an open prompt is abandoned, otherwise the run
/// stops at the next safe point and the orchestrator reports how far it got.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Could not listen for Ctrl+C"),
        }
    });
}

/// Non-blocking stderr plus an append-only run log file.
fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: &std::path::Path,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    let (nb_file, file_guard) = tracing_appender::non_blocking(file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(nb_file);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(vec![stderr_guard, file_guard])
}
