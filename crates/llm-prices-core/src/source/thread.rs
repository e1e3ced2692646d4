use std::sync::Arc;

use futures::channel::oneshot;
use futures::FutureExt;
use reqwest::Client;
use tracing::warn;

use super::{client_builder, AutoUpdate, Outcome, Pending, Plan, Spawn};
use crate::config::SourceConfig;
use crate::error::{PriceError, Result};
use crate::snapshot::DataSnapshot;

/// Auto-updating source for blocking callers. Each refresh gets its own
/// worker thread. Clones share the same snapshot, in-flight refresh and
/// HTTP client.
#[derive(Clone)]
pub struct SyncSource {
    core: Arc<AutoUpdate>,
    client: Client,
}

impl SyncSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;
        // Each refresh drives the client from a short-lived runtime, and a
        // pooled connection cannot outlive the runtime that opened it.
        let client = client_builder(&config).pool_max_idle_per_host(0).build()?;
        Ok(Self::with_client(config, client))
    }

    /// `client` must not keep idle connections between refreshes.
    pub fn with_client(config: SourceConfig, client: Client) -> Self {
        Self {
            core: Arc::new(AutoUpdate::new(config)),
            client,
        }
    }

    /// A snapshot young enough to serve, blocking on a refresh only when
    /// there is none.
    pub fn fetch(&self) -> Result<Arc<DataSnapshot>> {
        match self.core.plan(self) {
            Plan::Ready(snapshot) => Ok(snapshot),
            Plan::Join(refresh) => self.core.settle(futures::executor::block_on(refresh)),
        }
    }

    /// Start a background refresh unless one is already running.
    pub fn pre_fetch(&self) {
        self.core.pre_fetch(self);
    }

    /// Latest snapshot regardless of age, without touching the network.
    pub fn current(&self) -> Option<Arc<DataSnapshot>> {
        self.core.current()
    }

    pub fn config(&self) -> &SourceConfig {
        self.core.config()
    }
}

impl Spawn for SyncSource {
    fn spawn_refresh(&self) -> Pending {
        let (tx, rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        let client = self.client.clone();
        let spawned = std::thread::Builder::new()
            .name("llm-prices-refresh".into())
            .spawn(move || {
                // The receiver may be gone if nobody is waiting.
                let _ = tx.send(run_refresh(&core, &client));
            });

        if let Err(e) = spawned {
            warn!(error = %e, "cannot start price data refresh thread");
            let err = Arc::new(PriceError::Io(format!("cannot start refresh thread: {e}")));
            return futures::future::ready(Err(err)).boxed().shared();
        }

        rx.map(|received| {
            received.unwrap_or_else(|_| {
                Err(Arc::new(PriceError::Io("refresh thread exited without a result".into())))
            })
        })
        .boxed()
        .shared()
    }
}

/// Body of the worker thread: a private single-threaded runtime around the
/// async refresh.
fn run_refresh(core: &AutoUpdate, client: &Client) -> Outcome {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            warn!(error = %e, "cannot start price data refresh runtime");
            Arc::new(PriceError::Io(format!("cannot start refresh runtime: {e}")))
        })?;
    runtime.block_on(core.refresh(client))
}
