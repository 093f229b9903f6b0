// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cairn daemon (cairnd)
//!
//! Long-running process that owns the scheduling loop for one data
//! directory. Exactly one instance may run against a data directory; a
//! second instance fails fast at startup instead of corrupting the journal.

use std::path::PathBuf;
use std::process::ExitCode;

use cairn_daemon::{startup, FileConfig, LifecycleError};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("cairn.toml")
    };

    // The log file location comes from the config, so parse it before
    // installing the subscriber
    let config = match FileConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cairnd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cairnd: cannot open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("cairnd: cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(&config_path))
}

async fn run(config_path: &std::path::Path) -> ExitCode {
    info!(config = %config_path.display(), "starting cairnd");

    let daemon = match startup(config_path) {
        Ok(daemon) => daemon,
        Err(e) => return report_startup_failure(&e),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = spawn_signal_listener(shutdown_tx) {
        error!(error = %e, "cannot install signal handlers");
        return ExitCode::FAILURE;
    }

    info!("daemon ready");
    daemon.orchestrator.run(shutdown_rx).await;
    info!("daemon stopped");
    ExitCode::SUCCESS
}

// Each failure class gets its own exit code and operator guidance; a locked
// or corrupt store must never be "fixed" by blindly restarting.
fn report_startup_failure(e: &LifecycleError) -> ExitCode {
    error!(error = %e, "failed to start daemon");
    match e {
        LifecycleError::StoreLocked(path) => {
            eprintln!(
                "cairnd: another instance is already running against {}; refusing to start",
                path.display()
            );
            ExitCode::from(2)
        }
        LifecycleError::StoreCorrupt(source) => {
            eprintln!(
                "cairnd: {}\nThe operation journal is damaged; restore it from backup or move \
                 it aside to start fresh. Backup repositories themselves are unaffected.",
                source
            );
            ExitCode::from(3)
        }
        e => {
            eprintln!("cairnd: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });
    Ok(())
}

fn setup_logging(
    config: &FileConfig,
) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    let dir = log_path.parent().unwrap_or(std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = log_path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "log path has no file name"))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
