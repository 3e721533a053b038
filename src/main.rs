//! kam - Keep Alive Monitor
//!
//! Samples activity probes (CPU load, processes, network, user input, kick
//! files) on a fixed cadence and runs a configured command once the machine
//! has been inactive for long enough. Optionally exits after that.

mod clock;
mod config;
mod error;
mod event;
mod logging;
mod probe;
mod scheduler;
mod shutdown;
mod tracker;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, LogFormat, LoggingConfig};
use crate::logging::JsonlJournal;
use crate::scheduler::CycleScheduler;
use crate::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::tracker::{InactivityTracker, TrackerConfig};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    /// Inactivity timeout reached with `die_on_inactive` set.
    Inactive,
    /// Ctrl-C or SIGTERM.
    Shutdown,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting kam v{}", VERSION);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let interval = config.scheduler.interval();

    let registry = probe::build_registry(&config.plugins, interval, clock.clone());
    if !registry.all().iter().any(|p| p.is_enabled()) {
        warn!("No probe enabled, the machine will always be considered inactive");
    }

    let mut scheduler = CycleScheduler::new(interval, clock.clone());
    scheduler.set_registry(registry);

    let logs_dir = config.logging.logs_dir();
    let dispatcher = event::build_dispatcher(&config.eventhandler, &logs_dir);
    let tracker_config = TrackerConfig::from_eventhandler(&config.eventhandler);
    let mut tracker = InactivityTracker::new(&tracker_config, clock, dispatcher);

    let mut journal = logging::journal_enabled(&config.eventhandler).then(|| JsonlJournal::new(logs_dir));
    if let Some(journal) = journal.as_mut() {
        if let Err(e) = journal.log_session_start(VERSION) {
            warn!("Failed to write journal: {}", e);
        }
    }

    let (shutdown_tx, shutdown) = shutdown_channel();
    tokio::spawn(listen_for_signals(shutdown_tx));

    info!("Entering main loop");
    let reason = run_loop(&mut scheduler, &mut tracker, shutdown).await;

    match reason {
        ExitReason::Inactive => info!("Inactive for {:?}, exiting", tracker.idle_for()),
        ExitReason::Shutdown => info!("Shutting down..."),
    }

    if let Some(journal) = journal.as_mut() {
        if let Err(e) = journal.log_session_end(scheduler.cycles()) {
            warn!("Failed to write journal: {}", e);
        }
    }

    info!("Ran {} cycles. Goodbye!", scheduler.cycles());
    Ok(())
}

/// Cycle until the tracker asks to terminate or a shutdown is requested.
///
/// Shutdown only interrupts the inter-cycle sleep; a cycle that has started
/// always completes its update, including any handler it triggers.
async fn run_loop(
    scheduler: &mut CycleScheduler,
    tracker: &mut InactivityTracker,
    mut shutdown: ShutdownToken,
) -> ExitReason {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => return ExitReason::Shutdown,
            _ = scheduler.run_cycle() => {}
        }

        let state = tracker.update(scheduler.registry().any_active()).await;
        tracing::debug!(cycle = scheduler.cycles(), ?state, idle_for = ?tracker.idle_for(), "Tracker updated");

        if tracker.should_terminate() {
            return ExitReason::Inactive;
        }
    }
}

/// Signal shutdown on Ctrl-C, and on SIGTERM where available.
async fn listen_for_signals(shutdown: ShutdownSender) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Failed to listen for Ctrl-C: {}", e);
                            return;
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
    }

    info!("Shutdown signal received");
    shutdown.shutdown();
}

/// Initialize tracing subscriber from the logging section.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()?,
    }

    Ok(())
}
