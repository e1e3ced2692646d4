use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;

use super::{build_client, AutoUpdate, Outcome, Pending, Plan, Spawn, Updater};
use crate::config::SourceConfig;
use crate::error::{PriceError, Result};
use crate::snapshot::DataSnapshot;

/// Auto-updating source for async callers. Refreshes run as Tokio tasks, so
/// every method must be called from within a Tokio runtime. Clones share
/// the same snapshot and in-flight refresh.
#[derive(Clone)]
pub struct AsyncSource {
    core: Arc<AutoUpdate>,
    client: Client,
}

impl AsyncSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: SourceConfig, client: Client) -> Self {
        Self {
            core: Arc::new(AutoUpdate::new(config)),
            client,
        }
    }

    /// A snapshot young enough to serve, waiting for a refresh only when
    /// there is none.
    pub async fn fetch(&self) -> Result<Arc<DataSnapshot>> {
        match self.core.plan(self) {
            Plan::Ready(snapshot) => Ok(snapshot),
            Plan::Join(refresh) => self.core.settle(refresh.await),
        }
    }

    /// Start a background refresh unless one is already running.
    pub fn pre_fetch(&self) {
        self.core.pre_fetch(self);
    }

    /// Refresh every `interval` in the background, starting now, until the
    /// returned [`Updater`] is stopped or dropped.
    pub fn start_updater(&self, interval: Duration) -> Result<Updater> {
        if interval.is_zero() {
            return Err(PriceError::Config("update interval must be positive".into()));
        }
        Ok(Updater::spawn(self.clone(), interval))
    }

    /// Join the running refresh or start one, regardless of freshness.
    pub(crate) async fn refresh_now(&self) -> Outcome {
        self.core.refresh_now(self).await
    }

    /// Latest snapshot regardless of age, without touching the network.
    pub fn current(&self) -> Option<Arc<DataSnapshot>> {
        self.core.current()
    }

    pub fn config(&self) -> &SourceConfig {
        self.core.config()
    }
}

impl Spawn for AsyncSource {
    fn spawn_refresh(&self) -> Pending {
        let core = Arc::clone(&self.core);
        let client = self.client.clone();
        let handle = tokio::spawn(async move { core.refresh(&client).await });
        async move {
            handle.await.unwrap_or_else(|e| {
                Err(Arc::new(PriceError::Io(format!("price data refresh task failed: {e}"))))
            })
        }
        .boxed()
        .shared()
    }
}
