use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{AsyncSource, Outcome};
use crate::error::{PriceError, Result};
use crate::snapshot::DataSnapshot;

/// Refreshes an [`AsyncSource`] on a fixed interval, whether or not anyone
/// is calling `fetch`. Scheduled refreshes join any refresh a caller already
/// started. A failed refresh is logged and retried at the next tick.
///
/// Dropping the updater stops it after the refresh in progress, if any.
pub struct Updater {
    stop: watch::Sender<bool>,
    updates: watch::Receiver<Option<Outcome>>,
    task: JoinHandle<()>,
}

impl Updater {
    pub(crate) fn spawn(source: AsyncSource, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let (report, updates) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // Also fires when the updater is dropped.
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let outcome = source.refresh_now().await;
                        report.send_replace(Some(outcome));
                    }
                }
            }
            debug!("price data updater stopped");
        });
        Self { stop, updates, task }
    }

    /// Wait for the first scheduled refresh and return its result.
    pub async fn wait_first(&self) -> Result<Arc<DataSnapshot>> {
        let mut updates = self.updates.clone();
        let outcome = updates
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PriceError::Io("price data updater stopped before its first refresh".into()))?
            .clone();
        outcome
            .ok_or_else(|| PriceError::Io("price data updater reported nothing".into()))?
            .map_err(PriceError::Refresh)
    }

    /// Outcome of the most recent scheduled refresh, if one has finished.
    pub fn last_update(&self) -> Option<Result<Arc<DataSnapshot>>> {
        self.updates.borrow().clone().map(|outcome| outcome.map_err(PriceError::Refresh))
    }

    /// Stop scheduling refreshes and wait for the one in progress to end.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "price data updater task failed");
        }
    }
}
