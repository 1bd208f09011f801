//! # Bike Beacon
//!
//! Embedded telemetry client for a bicycle tracker.
//!
//! This application drives a combined GPS/cellular modem (SIM808 family)
//! over a serial UART: it polls GPS fixes on a fixed cadence, keeps a
//! cellular data session alive with backoff, uploads buffered location
//! reports to the remote collector, and mirrors the device state on a
//! tri-color status LED.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

mod config;
mod error;
mod modem;
mod gps;
mod net;
mod upload;
mod status;

use config::Config;
use gps::GpsTracker;
use modem::{CommandSession, SerialTransport};
use net::{Backoff, NetworkSessionManager, SessionState};
use status::{StatusIndicator, StatusInputs, TracingLed};
use upload::{ModemHttpCollector, UploadOutcome, UploadQueue, Uploader};

/// Fallback configuration path
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How often the session maintenance arm wakes up
const SESSION_TICK: Duration = Duration::from_secs(1);

/// Main entry point for Bike Beacon
///
/// Initializes logging, loads configuration, opens the modem serial port,
/// and runs the main loop: GPS polling, session maintenance, and upload
/// draining as select arms, with Ctrl+C for graceful shutdown. In-flight
/// commands always complete (or time out) before teardown so the modem's
/// protocol state stays consistent.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("Bike Beacon v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        warn!("config {} not found, using defaults", config_path);
        Config::default()
    };

    let min_fix = config
        .min_fix_quality()
        .context("min_fix_quality must be \"2d\" or \"3d\"")?;

    // Open the modem link
    let transport = if config.serial.port.is_empty() {
        SerialTransport::open(config.serial.baud_rate)?
    } else {
        SerialTransport::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)?
    };
    info!("modem serial port opened at: {}", transport.device_path());

    let session = Arc::new(CommandSession::new(Box::new(transport)));

    // Wire up the components
    let network = NetworkSessionManager::new(
        Arc::clone(&session),
        config.network.apn.clone(),
        Backoff::new(config.backoff_initial(), config.backoff_cap()),
        config.command_timeout(),
    );

    let mut tracker = GpsTracker::new(Arc::clone(&session), min_fix, config.command_timeout());
    if let Err(e) = tracker.power_on().await {
        warn!("GPS power-on failed: {}", e);
        network.note_failure(&e);
    }

    let queue = Arc::new(Mutex::new(UploadQueue::new(
        config.upload.max_queue_entries,
        config.upload.max_attempt_count,
    )));
    let collector = Arc::new(ModemHttpCollector::new(
        Arc::clone(&session),
        config.upload.endpoint.clone(),
        config.command_timeout(),
    ));
    let mut uploader = Uploader::new(
        Arc::clone(&queue),
        collector,
        config.upload.device_id,
        config.upload.upload_batch_size,
    );

    let mut indicator = StatusIndicator::new(
        Box::new(TracingLed),
        min_fix,
        config.upload.backlog_threshold,
    );
    indicator.update(&StatusInputs::initial());

    let mut gps_interval = interval(Duration::from_secs(config.gps.gps_poll_interval_s));
    let mut drain_interval = interval(Duration::from_secs(config.upload.drain_interval_s));
    let mut session_tick = interval(SESSION_TICK);
    let mut next_session_attempt = Instant::now();

    info!(
        "entering main loop (GPS every {}s, drain every {}s)",
        config.gps.gps_poll_interval_s, config.upload.drain_interval_s
    );

    loop {
        tokio::select! {
            // Poll the GPS on its cadence
            _ = gps_interval.tick() => {
                match tracker.poll().await {
                    Ok(Some(sample)) => {
                        let mut q = queue.lock().unwrap();
                        q.enqueue(sample);
                        debug!("queue depth now {}", q.len());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("GPS poll failed: {}", e);
                        network.note_failure(&e);
                    }
                }
            }

            // Keep the data session alive, with backoff between failures
            _ = session_tick.tick() => {
                let pump_window = Duration::from_millis(config.serial.read_timeout_ms);
                if let Err(e) = session.pump_unsolicited(pump_window).await {
                    network.note_failure(&e);
                }

                if !network.is_usable() && Instant::now() >= next_session_attempt {
                    match network.ensure_session().await {
                        Ok(()) => next_session_attempt = Instant::now(),
                        Err(e) => {
                            let delay = network.next_backoff();
                            debug!("session attempt failed ({}), retrying in {:?}", e, delay);
                            next_session_attempt = Instant::now() + delay;
                        }
                    }
                }
            }

            // Drain the queue while the session is usable
            _ = drain_interval.tick() => {
                if network.current_state() == SessionState::DataSessionUp {
                    match uploader.drain_once().await {
                        UploadOutcome::Failed(error) => {
                            if let error::UploadError::Command(e) = &error {
                                network.note_failure(e);
                            }
                        }
                        UploadOutcome::Drained { sent, .. } => {
                            debug!("drain cycle shipped {} sample(s)", sent);
                        }
                        UploadOutcome::Idle => {}
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }

        // Device status is derived, never stored: recompute after every arm
        indicator.update(&StatusInputs {
            session: network.current_state(),
            fix_quality: tracker.last_fix_quality(),
            queue_len: queue.lock().unwrap().len(),
            upload_failures: uploader.consecutive_failures(),
        });
    }

    // Teardown: any in-flight command has already completed or timed out
    {
        let q = queue.lock().unwrap();
        if !q.is_empty() {
            warn!(
                "{} unsent sample(s) remain ({} evicted, {} dropped this run)",
                q.len(),
                q.evicted(),
                q.dropped()
            );
        }
    }
    let _ = tracker.power_off().await;
    network.teardown().await;
    info!("shutdown complete");

    Ok(())
}
