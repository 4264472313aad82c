use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use schema::MarketMetadata;
use serde::Deserialize;
use std::time::Duration;

/// Market data lookup for a token mint. `None` means the lookup failed or the
/// mint is unknown; callers proceed without it.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn lookup(&self, mint: &str) -> Option<MarketMetadata>;
}

#[derive(Debug, Deserialize)]
struct CoinResponse {
    #[serde(default)]
    usd_market_cap: Option<f64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

impl From<CoinResponse> for MarketMetadata {
    fn from(c: CoinResponse) -> Self {
        MarketMetadata {
            cap_usd: c.usd_market_cap.unwrap_or(0.0),
            name: c.name.unwrap_or_else(|| "Unknown".to_string()),
            ticker: c.symbol.unwrap_or_else(|| "???".to_string()),
        }
    }
}

/// pump.fun frontend API, `GET {base}/coins/{mint}`.
#[derive(Clone)]
pub struct PumpFunClient {
    http: Client,
    base_url: String,
}

impl PumpFunClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for PumpFunClient {
    async fn lookup(&self, mint: &str) -> Option<MarketMetadata> {
        let url = format!("{}/coins/{}", self.base_url, mint);

        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("metadata lookup failed mint={mint}: {e:?}");
                return None;
            }
        };

        if !resp.status().is_success() {
            debug!("metadata lookup mint={mint} status={}", resp.status());
            return None;
        }

        match resp.json::<CoinResponse>().await {
            Ok(c) => Some(c.into()),
            Err(e) => {
                debug!("metadata decode failed mint={mint}: {e:?}");
                None
            }
        }
    }
}
