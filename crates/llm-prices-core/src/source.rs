//! Auto-updating price data.
//!
//! `AutoUpdate` holds the current snapshot and at most one in-flight
//! refresh. It decides what a caller gets; the adapters only decide how a
//! refresh runs:
//!
//! - [`SyncSource`] runs each refresh on a worker thread and callers block.
//! - [`AsyncSource`] runs each refresh as a Tokio task and callers await.
//!
//! An [`Updater`] adds refreshes on a fixed schedule to an `AsyncSource`.

mod task;
mod thread;
mod updater;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use reqwest::{Client, ClientBuilder};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{PriceError, Result};
use crate::provider::{parse_providers_slice, Provider};
use crate::snapshot::DataSnapshot;

pub use task::AsyncSource;
pub use thread::SyncSource;
pub use updater::Updater;

/// Result of one refresh, shared by everyone waiting on it.
pub(crate) type Outcome = std::result::Result<Arc<DataSnapshot>, Arc<PriceError>>;

/// A refresh that any number of callers can join.
pub(crate) type Pending = Shared<BoxFuture<'static, Outcome>>;

/// Starts a refresh in some execution context.
pub(crate) trait Spawn {
    fn spawn_refresh(&self) -> Pending;
}

/// How a snapshot's age compares to the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Absent,
    /// Younger than `fetch_age`.
    Fresh,
    /// Between `fetch_age` and `max_age`: served, but due for a refresh.
    Stale,
    /// At least `max_age`: not served while a refresh can replace it.
    Expired,
}

impl Freshness {
    pub fn of(snapshot: Option<&DataSnapshot>, config: &SourceConfig, now: DateTime<Utc>) -> Self {
        let Some(snapshot) = snapshot else {
            return Self::Absent;
        };
        // A snapshot from the future (clock step) counts as brand new.
        let age = snapshot.age(now).to_std().unwrap_or_default();
        if age < config.fetch_age {
            Self::Fresh
        } else if age < config.max_age {
            Self::Stale
        } else {
            Self::Expired
        }
    }

    pub fn is_usable(self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }
}

pub(crate) enum Plan {
    Ready(Arc<DataSnapshot>),
    Join(Pending),
}

/// State shared by a source and its background refreshes.
pub(crate) struct AutoUpdate {
    config: SourceConfig,
    current: ArcSwapOption<DataSnapshot>,
    /// The running refresh, if any. The refresh clears it when done, so an
    /// entry is only left behind by work that never reached `refresh`.
    pending: Mutex<Option<Pending>>,
}

impl AutoUpdate {
    pub(crate) fn new(config: SourceConfig) -> Self {
        Self {
            config,
            current: ArcSwapOption::empty(),
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub(crate) fn current(&self) -> Option<Arc<DataSnapshot>> {
        self.current.load_full()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        // A panic while holding the lock leaves nothing half-written.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide what a `fetch` call gets, starting a refresh if one is due.
    pub(crate) fn plan(&self, spawner: &impl Spawn) -> Plan {
        let mut pending = self.lock_pending();
        if let Some(running) = pending.as_ref() {
            if running.peek().is_none() {
                debug!("joining in-flight price data refresh");
                return Plan::Join(running.clone());
            }
            // Failed before reaching `refresh`, and a caller already saw why.
            *pending = None;
        }

        let current = self.current();
        let freshness = Freshness::of(current.as_deref(), &self.config, Utc::now());
        match (freshness, current) {
            (Freshness::Fresh, Some(snapshot)) => Plan::Ready(snapshot),
            (Freshness::Stale, Some(snapshot)) => {
                debug!("price data is stale, refreshing in the background");
                *pending = Some(spawner.spawn_refresh());
                Plan::Ready(snapshot)
            }
            (freshness, _) => {
                debug!(?freshness, "no usable price data, waiting for a refresh");
                let refresh = spawner.spawn_refresh();
                *pending = Some(refresh.clone());
                Plan::Join(refresh)
            }
        }
    }

    /// The running refresh, or a new one when none is running.
    pub(crate) fn refresh_now(&self, spawner: &impl Spawn) -> Pending {
        let mut pending = self.lock_pending();
        match pending.as_ref() {
            Some(running) if running.peek().is_none() => running.clone(),
            _ => {
                let refresh = spawner.spawn_refresh();
                *pending = Some(refresh.clone());
                refresh
            }
        }
    }

    /// Start a refresh unless one is already running.
    pub(crate) fn pre_fetch(&self, spawner: &impl Spawn) {
        let _ = self.refresh_now(spawner);
    }

    /// Turn a joined refresh into what the caller gets. A failed refresh
    /// still leaves the caller with any snapshot young enough to serve.
    pub(crate) fn settle(&self, outcome: Outcome) -> Result<Arc<DataSnapshot>> {
        match outcome {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                let current = self.current();
                match current {
                    Some(s) if Freshness::of(Some(&*s), &self.config, Utc::now()).is_usable() => Ok(s),
                    _ => Err(PriceError::Refresh(err)),
                }
            }
        }
    }

    /// Download, validate and install a new snapshot. Failures are logged
    /// and leave the current snapshot in place. Either way the refresh is
    /// no longer pending once this returns, whether or not anyone awaited it.
    pub(crate) async fn refresh(&self, client: &Client) -> Outcome {
        let outcome = self.download(client).await;
        self.finish_refresh();
        outcome
    }

    /// Only the refresh held in `pending` can be running, so the one that
    /// finishes is always the one to forget.
    fn finish_refresh(&self) {
        self.lock_pending().take();
    }

    async fn download(&self, client: &Client) -> Outcome {
        let started = Instant::now();
        match fetch_providers(client, &self.config.url).await {
            Ok(providers) => {
                let snapshot = Arc::new(DataSnapshot::fetched(providers));
                self.current.store(Some(Arc::clone(&snapshot)));
                info!(
                    url = %self.config.url,
                    providers = snapshot.providers().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "updated price data"
                );
                Ok(snapshot)
            }
            Err(err) => {
                warn!(url = %self.config.url, error = %err, "failed to update price data");
                Err(Arc::new(err))
            }
        }
    }
}

/// HTTP client with the configured timeouts.
pub fn build_client(config: &SourceConfig) -> Result<Client> {
    Ok(client_builder(config).build()?)
}

pub(crate) fn client_builder(config: &SourceConfig) -> ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
}

/// GET `url` and parse the body as a validated provider list.
pub async fn fetch_providers(client: &Client, url: &str) -> Result<Vec<Provider>> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PriceError::Api { status: status.as_u16(), body });
    }
    let bytes = resp.bytes().await?;
    parse_providers_slice(&bytes)
}
