//! Runs one [`WalletMonitor`] per wallet and supervises them.

use anyhow::{Result, bail};
use futures::FutureExt;
use log::{error, info, warn};
use schema::Wallet;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::Config;
use crate::helius::HeliusClient;
use crate::metadata::{MetadataSource, PumpFunClient};
use crate::metrics::Metrics;
use crate::monitor::{MonitorSettings, Pipeline, WalletMonitor};
use crate::notify::{DeliveryPolicy, WebhookNotifier};
use crate::shutdown::Shutdown;
use crate::watermark::{WatermarkRegistry, WatermarkStore};

/// How long monitors get to finish after shutdown before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub stagger: Duration,
    pub monitor: MonitorSettings,
}

#[derive(Debug, Default)]
pub struct FleetReport {
    pub started: usize,
    pub stopped: usize,
    pub failed: Vec<(Wallet, String)>,
    pub skipped: Vec<Wallet>,
    pub aborted: usize,
}

impl FleetReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted == 0
    }
}

enum Outcome {
    Stopped,
    Failed(String),
}

pub struct Fleet {
    pipeline: Pipeline,
    settings: FleetSettings,
}

impl Fleet {
    pub fn new(pipeline: Pipeline, settings: FleetSettings) -> Self {
        Self { pipeline, settings }
    }

    /// Start every wallet and wait until all monitors have terminated.
    pub async fn run(
        &self,
        wallets: Vec<Wallet>,
        mut registry: WatermarkRegistry,
        mut shutdown: Shutdown,
    ) -> Result<FleetReport> {
        if wallets.is_empty() {
            bail!("no wallets to monitor");
        }

        let mut report = FleetReport::default();
        let mut set = JoinSet::new();

        for wallet in wallets {
            let Some(watermark) = registry.claim(&wallet.address) else {
                warn!(
                    "duplicate address {} (wallet {}), skipping",
                    wallet.address, wallet.name
                );
                report.skipped.push(wallet);
                continue;
            };

            let delay = self.settings.stagger.saturating_mul(report.started as u32);
            let pipeline = self.pipeline.clone();
            let settings = self.settings.monitor.clone();
            let mut sd = shutdown.clone();
            report.started += 1;

            set.spawn(async move {
                if !sd.sleep(delay).await {
                    return (wallet, Outcome::Stopped);
                }

                let mut monitor = WalletMonitor::new(wallet.clone(), watermark, pipeline, settings);
                let outcome = match AssertUnwindSafe(monitor.run(sd)).catch_unwind().await {
                    Ok(Ok(())) => Outcome::Stopped,
                    Ok(Err(e)) => Outcome::Failed(e.to_string()),
                    Err(panic) => Outcome::Failed(format!("panicked: {}", panic_message(&*panic))),
                };
                (wallet, outcome)
            });
        }

        if report.started == 0 {
            bail!("no monitor could be started ({} skipped)", report.skipped.len());
        }
        info!(
            "fleet started monitors={} skipped={} stagger={:?}",
            report.started,
            report.skipped.len(),
            self.settings.stagger
        );

        let mut deadline: Option<Instant> = None;
        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        report.aborted = set.len();
                        warn!("aborting {} monitors still running after grace period", report.aborted);
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                        break;
                    }
                },
                None => tokio::select! {
                    next = set.join_next() => next,
                    _ = shutdown.wait() => {
                        info!("shutdown requested, waiting for {} monitors", set.len());
                        deadline = Some(Instant::now() + SHUTDOWN_GRACE);
                        continue;
                    }
                },
            };

            let Some(joined) = joined else { break };
            match joined {
                Ok((_, Outcome::Stopped)) => report.stopped += 1,
                Ok((wallet, Outcome::Failed(reason))) => {
                    error!(
                        "monitor failed wallet={} address={}: {reason}",
                        wallet.name, wallet.address
                    );
                    report.failed.push((wallet, reason));
                }
                Err(e) => {
                    report.aborted += 1;
                    warn!("monitor task did not complete: {e}");
                }
            }
        }

        info!(
            "fleet finished stopped={} failed={} aborted={} stats: {}",
            report.stopped,
            report.failed.len(),
            report.aborted,
            self.pipeline.metrics.snapshot()
        );
        Ok(report)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the live clients from `cfg` and run the fleet until shutdown.
pub async fn run(cfg: &Config, wallets: Vec<Wallet>, shutdown: Shutdown) -> Result<FleetReport> {
    let source = HeliusClient::new(&cfg.helius_url, &cfg.api_key, cfg.fetch_limit, cfg.http_timeout)?;

    let metadata: Option<Arc<dyn MetadataSource>> = if cfg.enrich_metadata {
        Some(Arc::new(PumpFunClient::new(&cfg.metadata_url, cfg.http_timeout)?))
    } else {
        None
    };

    let policy = DeliveryPolicy::new(cfg.notify_swaps, cfg.notify_native, cfg.sell_gate);
    let sink = WebhookNotifier::new(cfg.destinations.clone(), policy, cfg.http_timeout)?;

    let registry = match &cfg.watermark_file {
        Some(path) => {
            let store = WatermarkStore::open(path)?;
            info!("watermarks persisted to {} ({} known)", path.display(), store.snapshot().len());
            WatermarkRegistry::with_store(Arc::new(store))
        }
        None => WatermarkRegistry::new(),
    };

    let pipeline = Pipeline {
        source: Arc::new(source),
        metadata,
        sink: Arc::new(sink),
        slots: Arc::new(Semaphore::new(cfg.max_concurrency)),
        metrics: Arc::new(Metrics::new()),
    };

    let settings = FleetSettings {
        stagger: cfg.stagger,
        monitor: MonitorSettings {
            poll_interval: cfg.poll_interval,
            failure_backoff: cfg.failure_backoff,
            enrich_metadata: cfg.enrich_metadata,
        },
    };

    Fleet::new(pipeline, settings).run(wallets, registry, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helius::{FetchError, TransactionSource};
    use crate::monitor::tests::{RecordingSink, buy, fast_settings};
    use crate::shutdown;
    use async_trait::async_trait;
    use schema::RawTransaction;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Healthy wallets get one buy then empty batches; `Bad*` addresses panic,
    /// `Broken*` addresses return an undecodable response.
    #[derive(Default)]
    struct FleetSource {
        calls: Mutex<HashMap<String, usize>>,
    }

    impl FleetSource {
        fn calls(&self, address: &str) -> usize {
            self.calls.lock().unwrap().get(address).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl TransactionSource for FleetSource {
        async fn recent_transactions(&self, address: &str) -> Result<Vec<RawTransaction>, FetchError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(address.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if address.starts_with("Bad") {
                panic!("source blew up for {address}");
            }
            if address.starts_with("Broken") {
                return Err(FetchError::Decode("expected a sequence".into()));
            }
            if n == 1 {
                return Ok(vec![buy(10, &format!("sig-{address}"), "Mint1", 1.0)]);
            }
            Ok(vec![])
        }
    }

    fn fleet(source: Arc<FleetSource>, sink: Arc<RecordingSink>, stagger: Duration) -> Fleet {
        Fleet::new(
            Pipeline {
                source,
                metadata: None,
                sink,
                slots: Arc::new(Semaphore::new(2)),
                metrics: Arc::new(Metrics::new()),
            },
            FleetSettings {
                stagger,
                monitor: fast_settings(),
            },
        )
    }

    fn wallet(name: &str, address: &str) -> Wallet {
        Wallet::new(name, address).unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_failed_monitors_do_not_stop_siblings() {
        let source = Arc::new(FleetSource::default());
        let sink = Arc::new(RecordingSink::default());
        let fleet = fleet(source.clone(), sink.clone(), Duration::from_millis(1));

        let wallets = vec![
            wallet("Good", "Addr1"),
            wallet("Panicky", "BadAddr"),
            wallet("Garbled", "BrokenAddr"),
        ];

        let (trigger, sd) = shutdown::channel();
        let handle = tokio::spawn(async move { fleet.run(wallets, WatermarkRegistry::new(), sd).await });

        // healthy wallet keeps polling after both siblings died
        wait_for(|| source.calls("BadAddr") >= 1 && source.calls("BrokenAddr") >= 1).await;
        let after = source.calls("Addr1");
        wait_for(|| source.calls("Addr1") > after + 2).await;
        trigger.trigger();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.started, 3);
        assert_eq!(report.stopped, 1);
        assert_eq!(report.aborted, 0);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_clean());

        let panicked = report.failed.iter().find(|(w, _)| w.name == "Panicky").unwrap();
        assert!(panicked.1.contains("source blew up"));
        let garbled = report.failed.iter().find(|(w, _)| w.name == "Garbled").unwrap();
        assert!(garbled.1.contains("BrokenAddr"));

        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_addresses_are_skipped() {
        let source = Arc::new(FleetSource::default());
        let sink = Arc::new(RecordingSink::default());
        let fleet = fleet(source.clone(), sink.clone(), Duration::ZERO);

        let wallets = vec![wallet("W1", "Addr1"), wallet("W1 again", "Addr1")];
        let (trigger, sd) = shutdown::channel();
        let handle = tokio::spawn(async move { fleet.run(wallets, WatermarkRegistry::new(), sd).await });

        wait_for(|| source.calls("Addr1") >= 3).await;
        trigger.trigger();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "W1 again");
        assert!(report.is_clean());
        // one monitor, one notification
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_stagger_starts_nothing() {
        let source = Arc::new(FleetSource::default());
        let sink = Arc::new(RecordingSink::default());
        let fleet = fleet(source.clone(), sink, Duration::from_secs(3600));

        let wallets = vec![wallet("W1", "Addr1"), wallet("W2", "Addr2")];
        let (trigger, sd) = shutdown::channel();
        let handle = tokio::spawn(async move { fleet.run(wallets, WatermarkRegistry::new(), sd).await });

        wait_for(|| source.calls("Addr1") >= 1).await;
        trigger.trigger();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.stopped, 2);
        // second wallet was still waiting for its start slot
        assert_eq!(source.calls("Addr2"), 0);
    }

    #[tokio::test]
    async fn test_empty_fleet_is_an_error() {
        let fleet = fleet(
            Arc::new(FleetSource::default()),
            Arc::new(RecordingSink::default()),
            Duration::ZERO,
        );
        let (_trigger, sd) = shutdown::channel();
        assert!(fleet.run(vec![], WatermarkRegistry::new(), sd).await.is_err());
    }

    #[tokio::test]
    async fn test_all_addresses_already_claimed_is_an_error() {
        let fleet = fleet(
            Arc::new(FleetSource::default()),
            Arc::new(RecordingSink::default()),
            Duration::ZERO,
        );
        let mut registry = WatermarkRegistry::new();
        let _ = registry.claim("Addr1");

        let (_trigger, sd) = shutdown::channel();
        let res = fleet.run(vec![wallet("W1", "Addr1")], registry, sd).await;
        assert!(res.is_err());
    }
}
