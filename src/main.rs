//! voicelog - record, keep and replay voice memos from the terminal.
//!
//! Audio is captured from the selected input device straight into 16-bit PCM
//! WAV files. Memos are listed, tagged, renamed, exported and played back
//! through a line-oriented command interface on stdin.

mod audio;
mod config;
mod control;
mod error;
mod memo;
mod session;

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use audio::{AudioBackend, CpalBackend};
use config::{AppConfig, Settings};
use control::{Command, CommandError, Flow};
use memo::MemoStore;
use session::{Coordinator, TICK_INTERVAL};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }
}

/// Multiplex the tick timer, stdin commands and shutdown signals until the
/// user quits.
async fn run<B: AudioBackend>(coordinator: &mut Coordinator<B>) -> Result<()> {
    let mut stdout = std::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => coordinator.tick(),
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    match line.parse::<Command>() {
                        Ok(command) => {
                            if control::dispatch(coordinator, command, &mut stdout)? == Flow::Quit {
                                info!("👋 Quit requested");
                                break;
                            }
                        }
                        Err(CommandError::Empty) => writeln!(stdout, "{}", control::status_line(coordinator))?,
                        Err(e) => writeln!(stdout, "{}", e)?,
                    }
                    stdout.flush()?;
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("❌ Error reading stdin: {}", e);
                    break;
                }
            },
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Time-only log lines on stderr so stdout stays clean for commands.
    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎙️  voicelog v{}", env!("CARGO_PKG_VERSION"));

    let backend = CpalBackend::new();

    if config.list_devices {
        let devices = backend.devices().context("Failed to enumerate audio devices")?;
        control::write_devices(&devices, &mut std::io::stdout())?;
        return Ok(());
    }

    // Persisted settings, overlaid with command line flags for this run only
    let config_path = config.config_path();
    let persisted = Settings::load(&config_path, &config.home_dir);
    let mut settings = persisted.clone();
    config.apply_to(&mut settings);
    settings.normalize(&config.home_dir);
    config.log_config(&settings);

    let store = MemoStore::open(&settings.memos_path).with_context(|| format!("Failed to open memo directory {}", settings.memos_path.display()))?;
    let mut coordinator = Coordinator::new(backend, settings, store, config.export_dir.clone());

    println!("Ready. {} memo(s). Type 'help' for commands.", coordinator.memos().len());

    let result = run(&mut coordinator).await;

    // Never lose an open recording, whatever ended the loop
    coordinator.shutdown();

    let updated = Settings { volume: coordinator.volume(), ..persisted };
    if let Err(e) = updated.save(&config_path) {
        warn!("Failed to save settings: {:#}", e);
    }

    info!("✅ voicelog stopped");
    result
}
