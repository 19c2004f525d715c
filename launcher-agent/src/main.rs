//! Launcher Update Agent - Main entry point
//!
//! CLI driver around the update core: one-shot check/update/verify
//! commands plus a watch mode that re-checks on a fixed interval.

use anyhow::Result;
use clap::{Parser, Subcommand};
use launcher_agent::state::AgentPaths;
use launcher_agent::updater::{
    spawn_auto_update, CycleCallbacks, UpdateOutcome, Updater, AUTO_CHECK_INTERVAL,
};
use launcher_agent::{utils, UpdateError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Update server base URL
    #[arg(short, long, default_value = "http://localhost:3000")]
    server: String,

    /// Agent state directory (config, version state, downloads, backups)
    #[arg(long, value_name = "DIR", default_value = "/var/lib/launcher-agent")]
    state_dir: PathBuf,

    /// Path to the launcher configuration file (defaults to
    /// config.json inside the state directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the server for a newer version without installing anything
    Check,

    /// Run one update cycle: check, download, validate, install
    Update,

    /// Download and install the full client
    Install {
        /// Installation directory
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },

    /// Verify installed files against the server manifest
    Verify,

    /// Verify and re-download any missing or corrupted files
    Repair,

    /// Run continuously, checking for updates on a fixed interval
    Watch {
        /// Seconds between automatic checks
        #[arg(long, default_value_t = AUTO_CHECK_INTERVAL.as_secs())]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::logger::init(&args.log_level)?;

    let paths = AgentPaths::new(&args.state_dir);
    let config_path = args.config.clone().unwrap_or_else(|| paths.config_file());
    let updater = Arc::new(Updater::new(args.server.clone(), paths, config_path));

    tracing::info!(
        "launcher-agent v{} (server: {}, state: {})",
        env!("CARGO_PKG_VERSION"),
        args.server,
        args.state_dir.display()
    );

    match args.command {
        Command::Check => {
            let info = updater.check().await?;
            println!("Installed version: {}", info.current_version);
            println!("Server version:    {}", info.server_version);
            if info.needs_update {
                println!("Update available: {}", info.server_version);
                if let Some(patch) = info.pending_patch() {
                    for change in &patch.changes {
                        println!("  - {}", change);
                    }
                }
            } else {
                println!("Client is up to date");
            }
        }

        Command::Update => {
            let cancel = shutdown_token();
            match updater.run_cycle(&console_callbacks(), &cancel).await {
                Ok(UpdateOutcome::UpToDate) => println!("Client is up to date"),
                Ok(UpdateOutcome::Updated { version }) => {
                    println!("Update to {} completed successfully", version)
                }
                Err(e) => return fail("Update failed", e),
            }
        }

        Command::Install { path } => {
            let cancel = shutdown_token();
            match updater
                .install_full_client(&path, &console_callbacks(), &cancel)
                .await
            {
                Ok(()) => println!("Installation completed successfully"),
                Err(e) => return fail("Installation failed", e),
            }
        }

        Command::Verify => {
            let report = updater.verify().await?;
            if report.is_clean() {
                println!("All files verified: no issues found");
            } else {
                for path in &report.missing {
                    println!("missing:   {}", path);
                }
                for path in &report.corrupted {
                    println!("corrupted: {}", path);
                }
                println!(
                    "{} missing, {} corrupted — run `repair` to fix",
                    report.missing.len(),
                    report.corrupted.len()
                );
                std::process::exit(1);
            }
        }

        Command::Repair => {
            let on_file = Arc::new(|path: &str| println!("repairing {}", path));
            match updater.verify_and_repair(Some(on_file)).await {
                Ok(0) => println!("All files verified: nothing to repair"),
                Ok(count) => println!("Repaired {} file(s)", count),
                Err(e) => return fail("Repair failed", e),
            }
        }

        Command::Watch { interval_secs } => {
            let cancel = shutdown_token();
            let interval = Duration::from_secs(interval_secs);

            // Initial cycle, then the timer takes over
            match updater.run_cycle(&CycleCallbacks::default(), &cancel).await {
                Ok(UpdateOutcome::UpToDate) => tracing::info!("Client is up to date"),
                Ok(UpdateOutcome::Updated { version }) => {
                    tracing::info!("Updated to {}", version)
                }
                Err(e) => tracing::error!("Initial update check failed: {}", e),
            }

            let timer = spawn_auto_update(updater.clone(), interval, cancel.clone());
            tracing::info!(
                "Watching for updates every {}s, Ctrl+C to stop",
                interval_secs
            );

            cancel.cancelled().await;
            let _ = tokio::time::timeout(Duration::from_secs(3), timer).await;
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}

/// Failure status distinct from any success string, trigger re-armed
/// (the process exits; the next invocation is the retry).
fn fail(what: &str, err: UpdateError) -> Result<()> {
    eprintln!("{}: {}", what, err);
    std::process::exit(1);
}

/// Progress/phase hooks that paint plain console lines.
fn console_callbacks() -> CycleCallbacks {
    CycleCallbacks {
        on_progress: Some(Arc::new(|percent| {
            use std::io::Write;
            print!("\rdownloading... {:3}%", percent);
            let _ = std::io::stdout().flush();
            if percent == 100 {
                println!();
            }
        })),
        on_phase: Some(Arc::new(|phase, detail, percent| {
            tracing::info!("{}: {} ({}%)", phase, detail, percent);
        })),
    }
}

/// Token cancelled on SIGINT/SIGTERM; in-flight transfers discard their
/// partial output when it fires.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
        signalled.cancel();
    });

    token
}
