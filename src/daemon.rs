//! Periodic mode - repeats backup cycles on a fixed interval
//!
//! The first cycle starts immediately. A cycle that ends in a fatal error is
//! logged and the schedule continues; only an interrupt stops the loop.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::BackupError;
use crate::shutdown::Shutdown;
use crate::sync::{SyncEngine, SyncSummary};

/// Parse duration strings like "30m", "1h", "2d" or raw seconds
pub fn parse_interval(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let secs = if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value
            .parse::<u64>()
            .map(|v| v * 60)
            .context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value
            .parse::<u64>()
            .map(|v| v * 3600)
            .context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value
            .parse::<u64>()
            .map(|v| v * 86400)
            .context("Invalid days value")?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")?
    };

    if secs == 0 {
        anyhow::bail!("Interval must be greater than zero");
    }

    Ok(Duration::from_secs(secs))
}

/// Run backup cycles every `every` until shutdown is requested.
///
/// Returns `Ok(())` when interrupted between cycles and
/// [`BackupError::Cancelled`] when interrupted during one.
pub async fn run_periodic(
    engine: &SyncEngine,
    every: Duration,
    mut shutdown: Shutdown,
) -> Result<(), BackupError> {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Periodic backup started with interval: {:?}", every);

    let mut cycles: u64 = 0;
    let mut failed_cycles: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.requested() => {
                info!(
                    "Shutdown requested while idle, stopping after {} cycles ({} failed)",
                    cycles, failed_cycles
                );
                return Ok(());
            }
            _ = timer.tick() => {}
        }

        cycles += 1;
        debug!("Starting backup cycle {}", cycles);
        let cycle_start = Instant::now();

        match engine.run(shutdown.clone()).await {
            Ok(summary) => log_cycle_success(&summary, cycle_start.elapsed()),
            Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
            Err(e) => {
                failed_cycles += 1;
                error!("Backup cycle {} failed: {}", cycles, e);
            }
        }
    }
}

fn log_cycle_success(summary: &SyncSummary, duration: Duration) {
    if summary.has_failures() {
        warn!(
            "Backup cycle finished in {:.2}s with {} failed repositories",
            duration.as_secs_f64(),
            summary.failed
        );
    } else {
        info!(
            "Backup cycle finished in {:.2}s: {} repos",
            duration.as_secs_f64(),
            summary.total_repositories
        );
    }
}
