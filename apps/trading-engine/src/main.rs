//! Trading engine binary.
//!
//! ```bash
//! trading-engine --config config/default.json
//! trading-engine --config config/default.json --dry-run
//! trading-engine --log-level debug
//! ```
//!
//! Exit codes: 0 clean shutdown, 1 fatal init error, 2 invalid
//! configuration, 130 interrupt.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use trading_engine::config::Config;
use trading_engine::error::{FatalError, EXIT_INTERRUPTED};
use trading_engine::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(name = "trading-engine", version, about = "Model-driven trading execution core")]
struct Cli {
    /// Path to the main configuration file.
    #[arg(short, long, default_value = "config/default.json")]
    config: PathBuf,

    /// Log level override.
    #[arg(short, long, value_parser = ["debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Evaluate everything but send no orders.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return exit_code(FatalError::from(e).exit_code());
        }
    };

    // The guard keeps the file writer alive for the process lifetime.
    let _log_guard = init_tracing(&config, cli.log_level.as_deref());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "async runtime init failed");
            return exit_code(1);
        }
    };

    runtime.block_on(run(config, cli.dry_run))
}

async fn run(config: Config, dry_run: bool) -> ExitCode {
    let orchestrator = Orchestrator::new(config, dry_run);
    let cancel = orchestrator.cancellation_token();
    let interrupted = Arc::new(AtomicBool::new(false));

    {
        let cancel = cancel.clone();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            interrupted.store(true, Ordering::SeqCst);
            cancel.cancel();
        });
    }

    match orchestrator.run().await {
        Ok(reason) => {
            info!(reason = %reason, "engine stopped");
            if interrupted.load(Ordering::SeqCst) {
                exit_code(EXIT_INTERRUPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "fatal error");
            exit_code(e.exit_code())
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {}
                    _ = terminate.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Install the tracing subscriber: stderr always, plus an optional
/// rolling file from the `logging` section.
fn init_tracing(
    config: &Config,
    level_override: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = level_override.unwrap_or(&config.logging.level).to_string();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trading_engine={level},info")));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match (&config.paths.log_dir, &config.logging.file) {
        (Some(dir), Some(file)) if !file.is_empty() => {
            let appender = if config.logging.rotation == "never" {
                tracing_appender::rolling::never(dir, file)
            } else {
                tracing_appender::rolling::daily(dir, file)
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}
