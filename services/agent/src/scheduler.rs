//! Run cycles once or on an interval.
//!
//! In watch mode the scheduler sleeps for the configured interval between
//! cycles. The sleep is the only place a shutdown request is observed; a
//! cycle that has started always runs to completion.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::cycle::Updater;
use crate::error::CycleError;

/// Run update cycles until done.
///
/// Returns after one cycle unless watch mode is enabled, in which case it
/// returns when `shutdown` becomes true. A cycle error ends the run and is
/// returned to the caller.
pub async fn run(updater: &Updater, mut shutdown: watch::Receiver<bool>) -> Result<(), CycleError> {
    let config = updater.config();
    info!(
        watch = config.watch,
        bail = config.bail,
        interval_secs = config.interval.as_secs(),
        "Starting update checks"
    );

    loop {
        updater.run_cycle().await?;

        if !config.watch {
            return Ok(());
        }

        info!(
            next_check_in = %humantime::format_duration(config.interval),
            "Waiting for next update check"
        );
        if !wait_for_next_cycle(config.interval, &mut shutdown).await {
            info!("Update checks shutting down");
            return Ok(());
        }
    }
}

/// Sleep for `interval`. Returns false if shutdown was requested meanwhile.
async fn wait_for_next_cycle(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                // A dropped sender can no longer request shutdown.
                if changed.is_err() {
                    sleep.as_mut().await;
                    return true;
                }
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
