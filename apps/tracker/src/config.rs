use anyhow::{Context, Result, anyhow};
use clap::Parser;
use schema::Wallet;
use std::{env, fs, path::PathBuf, time::Duration};

use crate::notify::{Destinations, SellGate};

pub const DEFAULT_HELIUS_URL: &str = "https://api.helius.xyz/v0";
pub const DEFAULT_METADATA_URL: &str = "https://frontend-api.pump.fun";

#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Watch Solana wallets and post their buys and sells to chat webhooks")]
pub struct Cli {
    /// JSON file with `[{"name": ..., "address": ...}]` (env WALLETS_FILE)
    #[arg(long)]
    pub wallets_file: Option<PathBuf>,

    /// Extra wallet as NAME=ADDRESS, repeatable
    #[arg(long = "wallet", value_name = "NAME=ADDRESS")]
    pub wallets: Vec<String>,

    /// Helius API key (env HELIUS_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Discord webhook URL (env DISCORD_WEBHOOK)
    #[arg(long)]
    pub discord_webhook: Option<String>,

    /// Telegram webhook URL (env TELEGRAM_WEBHOOK)
    #[arg(long)]
    pub telegram_webhook: Option<String>,

    /// Seconds between polls of one wallet (env POLL_INTERVAL_SECS)
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Seconds to wait after a failed fetch (env FAILURE_BACKOFF_SECS)
    #[arg(long)]
    pub failure_backoff_secs: Option<u64>,

    /// Delay between monitor starts (env STAGGER_SECS)
    #[arg(long)]
    pub stagger_secs: Option<u64>,

    /// Transactions requested per poll (env FETCH_LIMIT)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Wallets allowed to fetch/notify at the same time (env MAX_CONCURRENCY)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Look up market cap, name and ticker for buys and sells (env ENRICH_METADATA)
    #[arg(long)]
    pub enrich_metadata: bool,

    /// Deliver SWAPPED events (env NOTIFY_SWAPS)
    #[arg(long)]
    pub notify_swaps: bool,

    /// Deliver SOL SENT/RECEIVED events (env NOTIFY_NATIVE)
    #[arg(long)]
    pub notify_native: bool,

    /// How sell notifications are decided (env SELL_GATE)
    #[arg(long, value_enum)]
    pub sell_gate: Option<SellGate>,

    /// Persist watermarks here so restarts do not replay (env WATERMARK_FILE)
    #[arg(long)]
    pub watermark_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub wallets_file: PathBuf,
    pub extra_wallets: Vec<String>,

    pub api_key: String,
    pub helius_url: String,
    pub metadata_url: String,
    pub destinations: Destinations,

    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    pub stagger: Duration,
    pub http_timeout: Duration,
    pub fetch_limit: usize,
    pub max_concurrency: usize,

    pub enrich_metadata: bool,
    pub notify_swaps: bool,
    pub notify_native: bool,
    pub sell_gate: SellGate,

    pub watermark_file: Option<PathBuf>,
}

fn parse_bool(v: Option<String>, default: bool) -> bool {
    match v.as_deref() {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") | Some("NO") => false,
        None => default,
        _ => default,
    }
}

/// Keys and URLs get pasted with stray spaces and newlines.
fn sanitize(v: &str) -> String {
    v.chars().filter(|c| !c.is_whitespace()).collect()
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| sanitize(&s)).filter(|s| !s.is_empty())
}

fn env_num<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {key}={v}")),
        Err(_) => Ok(None),
    }
}

fn parse_sell_gate(s: &str) -> Result<SellGate> {
    match s.to_lowercase().as_str() {
        "unconditional" => Ok(SellGate::Unconditional),
        "ledger" => Ok(SellGate::Ledger),
        other => Err(anyhow!("Invalid SELL_GATE={other}. Use unconditional|ledger")),
    }
}

pub fn load(cli: &Cli) -> Result<Config> {
    let wallets_file = cli
        .wallets_file
        .clone()
        .or_else(|| env::var("WALLETS_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("wallets.json"));

    let api_key = non_empty(cli.api_key.clone().or_else(|| env::var("HELIUS_API_KEY").ok()))
        .ok_or_else(|| anyhow!("Helius API key not set (--api-key or HELIUS_API_KEY)"))?;

    let helius_url =
        non_empty(env::var("HELIUS_URL").ok()).unwrap_or_else(|| DEFAULT_HELIUS_URL.to_string());
    let metadata_url = non_empty(env::var("METADATA_URL").ok())
        .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string());

    let destinations = Destinations {
        discord: non_empty(
            cli.discord_webhook
                .clone()
                .or_else(|| env::var("DISCORD_WEBHOOK").ok()),
        ),
        telegram: non_empty(
            cli.telegram_webhook
                .clone()
                .or_else(|| env::var("TELEGRAM_WEBHOOK").ok()),
        ),
    };
    if destinations.is_empty() {
        return Err(anyhow!(
            "No Discord or Telegram webhook set. Set DISCORD_WEBHOOK or TELEGRAM_WEBHOOK"
        ));
    }

    let poll_secs = cli
        .poll_interval_secs
        .or(env_num("POLL_INTERVAL_SECS")?)
        .unwrap_or(30);
    let backoff_secs = cli
        .failure_backoff_secs
        .or(env_num("FAILURE_BACKOFF_SECS")?)
        .unwrap_or(60);
    let stagger_secs = cli.stagger_secs.or(env_num("STAGGER_SECS")?).unwrap_or(2);
    let timeout_secs: u64 = env_num("HTTP_TIMEOUT_SECS")?.unwrap_or(15);
    let fetch_limit = cli.limit.or(env_num("FETCH_LIMIT")?).unwrap_or(5);
    let max_concurrency = cli
        .max_concurrency
        .or(env_num("MAX_CONCURRENCY")?)
        .unwrap_or(8);

    let sell_gate = match cli.sell_gate {
        Some(g) => g,
        None => match env::var("SELL_GATE") {
            Ok(v) => parse_sell_gate(&v)?,
            Err(_) => SellGate::default(),
        },
    };

    let cfg = Config {
        wallets_file,
        extra_wallets: cli.wallets.clone(),
        api_key,
        helius_url,
        metadata_url,
        destinations,
        poll_interval: Duration::from_secs(poll_secs),
        failure_backoff: Duration::from_secs(backoff_secs),
        stagger: Duration::from_secs(stagger_secs),
        http_timeout: Duration::from_secs(timeout_secs),
        fetch_limit,
        max_concurrency,
        enrich_metadata: cli.enrich_metadata || parse_bool(env::var("ENRICH_METADATA").ok(), false),
        notify_swaps: cli.notify_swaps || parse_bool(env::var("NOTIFY_SWAPS").ok(), false),
        notify_native: cli.notify_native || parse_bool(env::var("NOTIFY_NATIVE").ok(), false),
        sell_gate,
        watermark_file: cli
            .watermark_file
            .clone()
            .or_else(|| env::var("WATERMARK_FILE").ok().map(PathBuf::from)),
    };

    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<()> {
    if cfg.poll_interval.is_zero() {
        return Err(anyhow!("poll interval must be at least 1s"));
    }
    if cfg.failure_backoff <= cfg.poll_interval {
        return Err(anyhow!(
            "failure backoff ({:?}) must exceed poll interval ({:?})",
            cfg.failure_backoff,
            cfg.poll_interval
        ));
    }
    if cfg.fetch_limit == 0 {
        return Err(anyhow!("fetch limit must be > 0"));
    }
    if cfg.max_concurrency == 0 {
        return Err(anyhow!("max concurrency must be > 0"));
    }
    if cfg.http_timeout.is_zero() {
        return Err(anyhow!("HTTP_TIMEOUT_SECS must be > 0"));
    }
    Ok(())
}

fn parse_wallet_arg(arg: &str) -> Result<Wallet> {
    let (name, address) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("--wallet expects NAME=ADDRESS, got {arg:?}"))?;
    Ok(Wallet::new(name, address)?)
}

/// Wallets from the wallets file (if present) followed by `--wallet` args.
pub fn load_wallets(cfg: &Config) -> Result<Vec<Wallet>> {
    let mut wallets = Vec::new();

    if cfg.wallets_file.exists() {
        let raw = fs::read_to_string(&cfg.wallets_file)
            .with_context(|| format!("reading {}", cfg.wallets_file.display()))?;
        let listed: Vec<Wallet> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", cfg.wallets_file.display()))?;
        for w in listed {
            wallets.push(w.validated()?);
        }
    }

    for arg in &cfg.extra_wallets {
        wallets.push(parse_wallet_arg(arg)?);
    }

    if wallets.is_empty() {
        return Err(anyhow!(
            "No wallets found. Add some to {} or pass --wallet NAME=ADDRESS",
            cfg.wallets_file.display()
        ));
    }
    Ok(wallets)
}

/// API key with all but the first and last four characters hidden.
pub fn masked(key: &str) -> String {
    let n = key.chars().count();
    if n <= 8 {
        return "*".repeat(n);
    }
    let head: String = key.chars().take(4).collect();
    let tail: String = key.chars().skip(n - 4).collect();
    format!("{head}…{tail}")
}
