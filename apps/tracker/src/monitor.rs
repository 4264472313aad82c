//! Per-wallet polling loop.
//!
//! Fetching -> Processing -> Sleeping -> Fetching, with Backoff replacing
//! Sleeping after a transient fetch failure. Shutdown is checked on every
//! transition and interrupts every wait.

use log::{debug, info, warn};
use schema::{RawTransaction, Wallet, classify};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::helius::{FetchError, TransactionSource};
use crate::metadata::MetadataSource;
use crate::metrics::Metrics;
use crate::notify::{Delivery, EventSink};
use crate::shutdown::Shutdown;
use crate::watermark::Watermark;

const STATS_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    pub enrich_metadata: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(60),
            enrich_metadata: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("fetch for {address} failed permanently: {source}")]
    Fetch {
        address: String,
        #[source]
        source: FetchError,
    },
}

/// Collaborators shared by every monitor in a fleet.
#[derive(Clone)]
pub struct Pipeline {
    pub source: Arc<dyn TransactionSource>,
    pub metadata: Option<Arc<dyn MetadataSource>>,
    pub sink: Arc<dyn EventSink>,
    pub slots: Arc<Semaphore>,
    pub metrics: Arc<Metrics>,
}

/// What one processed batch amounted to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fresh: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub events: usize,
    pub delivered: usize,
    pub suppressed: usize,
}

enum State {
    Fetching,
    Processing {
        batch: Vec<RawTransaction>,
        _slot: OwnedSemaphorePermit,
    },
    Sleeping(Duration),
    Backoff,
    Stopped,
}

pub struct WalletMonitor {
    wallet: Wallet,
    watermark: Watermark,
    pipeline: Pipeline,
    settings: MonitorSettings,
}

impl WalletMonitor {
    pub fn new(wallet: Wallet, watermark: Watermark, pipeline: Pipeline, settings: MonitorSettings) -> Self {
        Self {
            wallet,
            watermark,
            pipeline,
            settings,
        }
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark.last()
    }

    /// Poll until shutdown (`Ok`) or a non-transient fetch failure (`Err`).
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<(), MonitorError> {
        info!(
            "monitor started wallet={} address={} watermark={:?}",
            self.wallet.name,
            self.wallet.address,
            self.watermark.last()
        );

        let mut state = State::Fetching;

        loop {
            if shutdown.is_triggered() {
                state = State::Stopped;
            }

            state = match state {
                State::Fetching => self.fetch(&mut shutdown).await?,

                State::Processing { batch, _slot } => {
                    let report = self.process_batch(batch).await;
                    if report.fresh == 0 {
                        debug!("no new activity for {} (all seen)", self.wallet.name);
                    } else {
                        info!(
                            "wallet={} fresh={} events={} delivered={} suppressed={} watermark={:?}",
                            self.wallet.name,
                            report.fresh,
                            report.events,
                            report.delivered,
                            report.suppressed,
                            self.watermark.last()
                        );
                    }
                    self.maybe_log_stats();
                    State::Sleeping(self.settings.poll_interval)
                }

                State::Sleeping(d) => {
                    if shutdown.sleep(d).await {
                        State::Fetching
                    } else {
                        State::Stopped
                    }
                }

                State::Backoff => {
                    if shutdown.sleep(self.settings.failure_backoff).await {
                        State::Fetching
                    } else {
                        State::Stopped
                    }
                }

                State::Stopped => {
                    info!("monitor stopping wallet={}", self.wallet.name);
                    return Ok(());
                }
            };
        }
    }

    /// One fetch, holding a concurrency slot that stays with the batch until
    /// it has been processed.
    async fn fetch(&self, shutdown: &mut Shutdown) -> Result<State, MonitorError> {
        let slots = self.pipeline.slots.clone();
        let permit = tokio::select! {
            p = slots.acquire_owned() => p.ok(),
            _ = shutdown.wait() => None,
        };
        // semaphore closed or shutdown requested
        let Some(slot) = permit else {
            return Ok(State::Stopped);
        };

        let fetched = tokio::select! {
            res = self.pipeline.source.recent_transactions(&self.wallet.address) => res,
            _ = shutdown.wait() => return Ok(State::Stopped),
        };

        let metrics = &self.pipeline.metrics;
        match fetched {
            Ok(batch) if batch.is_empty() => {
                Metrics::add(&metrics.fetch_ok, 1);
                info!("no new activity for {} ({})", self.wallet.name, self.wallet.address);
                Ok(State::Sleeping(self.settings.poll_interval))
            }
            Ok(batch) => {
                Metrics::add(&metrics.fetch_ok, 1);
                Ok(State::Processing { batch, _slot: slot })
            }
            Err(e) if e.is_transient() => {
                Metrics::add(&metrics.fetch_err, 1);
                warn!(
                    "fetch failed wallet={} address={}: {e} (retrying in {:?})",
                    self.wallet.name, self.wallet.address, self.settings.failure_backoff
                );
                Ok(State::Backoff)
            }
            Err(e) => {
                Metrics::add(&metrics.fetch_err, 1);
                Err(MonitorError::Fetch {
                    address: self.wallet.address.clone(),
                    source: e,
                })
            }
        }
    }

    /// Classify and deliver everything in `batch` above the watermark, oldest
    /// first, then move the watermark to the highest slot in the batch.
    pub async fn process_batch(&mut self, mut batch: Vec<RawTransaction>) -> BatchReport {
        let metrics = self.pipeline.metrics.clone();
        let mut report = BatchReport::default();

        // no ordering guarantee from the API
        batch.sort_by_key(|tx| tx.slot);
        let max_slot = batch.iter().map(|tx| tx.slot).max();

        for tx in &batch {
            Metrics::add(&metrics.tx_seen, 1);

            if let Err(e) = tx.validate() {
                report.invalid += 1;
                Metrics::add(&metrics.tx_invalid, 1);
                warn!("skipping invalid transaction wallet={}: {e}", self.wallet.name);
                continue;
            }

            if !self.watermark.is_new(tx.slot) {
                report.duplicates += 1;
                Metrics::add(&metrics.tx_duplicate, 1);
                continue;
            }
            report.fresh += 1;

            for mut event in classify(tx, &self.wallet.address) {
                report.events += 1;
                Metrics::add(&metrics.events, 1);

                if self.settings.enrich_metadata && event.action.is_trade() {
                    let mint = event.mint().map(str::to_string);
                    if let (Some(md), Some(mint)) = (&self.pipeline.metadata, mint) {
                        event.market = md.lookup(&mint).await;
                    }
                }

                debug!(
                    "{} {} mint={:?} amount={:?} sol={} sig={}",
                    self.wallet.name,
                    event.action,
                    event.mint(),
                    event.token_amount(),
                    event.native_amount,
                    event.signature
                );

                match self.pipeline.sink.notify(&self.wallet, &event).await {
                    Delivery::Sent { ok, failed } => {
                        if ok > 0 {
                            report.delivered += 1;
                        }
                        Metrics::add(&metrics.notify_ok, ok as u64);
                        Metrics::add(&metrics.notify_err, failed as u64);
                    }
                    Delivery::Suppressed(_) => {
                        report.suppressed += 1;
                        Metrics::add(&metrics.notify_suppressed, 1);
                    }
                }
            }
        }

        if let Some(slot) = max_slot {
            self.watermark.advance(slot);
        }

        report
    }

    fn maybe_log_stats(&self) {
        let metrics = &self.pipeline.metrics;
        if metrics.bump_log_tick(STATS_EVERY) {
            info!("stats: {}", metrics.snapshot());
        }
    }
}
