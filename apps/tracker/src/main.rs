use anyhow::{Result, anyhow};
use clap::Parser;
use log::{error, info, warn};

mod config;
mod fleet;
mod helius;
mod ledger;
mod metadata;
mod metrics;
mod monitor;
mod notify;
mod shutdown;
mod watermark;

fn setup_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = config::Cli::parse();
    let cfg = config::load(&cli)?;
    let wallets = config::load_wallets(&cfg)?;

    info!(
        "tracking {} wallets via {} (api_key={})",
        wallets.len(),
        cfg.helius_url,
        config::masked(&cfg.api_key)
    );
    info!(
        "poll={:?} backoff={:?} stagger={:?} limit={} concurrency={} discord={} telegram={}",
        cfg.poll_interval,
        cfg.failure_backoff,
        cfg.stagger,
        cfg.fetch_limit,
        cfg.max_concurrency,
        cfg.destinations.discord.is_some(),
        cfg.destinations.telegram.is_some()
    );
    info!(
        "enrich_metadata={} notify_swaps={} notify_native={} sell_gate={:?} watermark_file={:?}",
        cfg.enrich_metadata, cfg.notify_swaps, cfg.notify_native, cfg.sell_gate, cfg.watermark_file
    );

    let (trigger, sd) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, shutting down");
                trigger.trigger();
            }
            Err(e) => {
                // dropping the trigger would stop the fleet
                warn!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
                drop(trigger);
            }
        }
    });

    let report = fleet::run(&cfg, wallets, sd).await?;

    for (wallet, reason) in &report.failed {
        error!("wallet {} ({}) stopped: {reason}", wallet.name, wallet.address);
    }
    if !report.failed.is_empty() {
        return Err(anyhow!(
            "{} of {} monitors failed",
            report.failed.len(),
            report.started
        ));
    }

    info!(
        "done: stopped={} skipped={} aborted={}",
        report.stopped,
        report.skipped.len(),
        report.aborted
    );
    Ok(())
}
