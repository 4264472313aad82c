//! Outbound chat notifications.
//!
//! Every destination gets one POST per event. Failures are logged and counted,
//! never retried and never returned to the monitor as errors.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use schema::{Action, ClassifiedEvent, Polarity, Wallet};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::TokenLedger;

const COLOR_GREEN: u32 = 65280;
const COLOR_RED: u32 = 16711680;
const COLOR_BLUE: u32 = 3447003;

/// Webhook endpoints. At least one is expected to be set.
#[derive(Debug, Clone, Default)]
pub struct Destinations {
    pub discord: Option<String>,
    pub telegram: Option<String>,
}

impl Destinations {
    pub fn is_empty(&self) -> bool {
        self.discord.is_none() && self.telegram.is_none()
    }
}

/// How sell notifications are decided. One mode per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SellGate {
    /// Every buy and sell is delivered.
    #[default]
    Unconditional,
    /// Buys credit a shared ledger; sells are delivered only when covered by it.
    Ledger,
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryPolicy {
    pub notify_swaps: bool,
    pub notify_native: bool,
    pub ledger: Option<Arc<TokenLedger>>,
}

impl DeliveryPolicy {
    pub fn new(notify_swaps: bool, notify_native: bool, gate: SellGate) -> Self {
        Self {
            notify_swaps,
            notify_native,
            ledger: match gate {
                SellGate::Unconditional => None,
                SellGate::Ledger => Some(Arc::new(TokenLedger::new())),
            },
        }
    }

    /// Returns the suppression reason, or `None` when the event should go out.
    /// Applies ledger credits and debits as a side effect.
    fn admit(&self, event: &ClassifiedEvent) -> Option<&'static str> {
        match event.action {
            Action::Swapped if !self.notify_swaps => return Some("swap notifications disabled"),
            Action::Sent | Action::Received if !self.notify_native => {
                return Some("native notifications disabled");
            }
            _ => {}
        }

        let (Some(ledger), Some(token)) = (&self.ledger, &event.token) else {
            return None;
        };

        match event.action {
            Action::Bought => {
                ledger.credit(&token.mint, token.amount);
                None
            }
            Action::Sold => {
                if !ledger.try_debit(&token.mint, token.amount) {
                    return Some("sell exceeds tracked holdings");
                }
                debug!("ledger {} remaining={:?}", token.mint, ledger.held(&token.mint));
                None
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { ok: usize, failed: usize },
    Suppressed(&'static str),
}

/// Where classified events go.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, wallet: &Wallet, event: &ClassifiedEvent) -> Delivery;
}

pub struct WebhookNotifier {
    http: Client,
    destinations: Destinations,
    policy: DeliveryPolicy,
}

impl WebhookNotifier {
    pub fn new(destinations: Destinations, policy: DeliveryPolicy, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            destinations,
            policy,
        })
    }

    async fn post(&self, kind: &str, url: &str, body: &Value) -> bool {
        match self.http.post(url).json(body).send().await {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_default();
                warn!("{kind} webhook rejected status={status} body={text}");
                false
            }
            Err(e) => {
                // webhook URLs embed their token
                warn!("{kind} webhook failed: {}", e.without_url());
                false
            }
        }
    }
}

#[async_trait]
impl EventSink for WebhookNotifier {
    async fn notify(&self, wallet: &Wallet, event: &ClassifiedEvent) -> Delivery {
        if let Some(reason) = self.policy.admit(event) {
            debug!(
                "suppressed {} wallet={} sig={}: {reason}",
                event.action, wallet.name, event.signature
            );
            return Delivery::Suppressed(reason);
        }

        let mut ok = 0;
        let mut failed = 0;

        if let Some(url) = &self.destinations.discord {
            let body = discord_payload(&wallet.name, event, &chrono::Utc::now().to_rfc3339());
            if self.post("discord", url, &body).await {
                ok += 1;
            } else {
                failed += 1;
            }
        }

        if let Some(url) = &self.destinations.telegram {
            let body = json!({ "text": plain_message(&wallet.name, event) });
            if self.post("telegram", url, &body).await {
                ok += 1;
            } else {
                failed += 1;
            }
        }

        Delivery::Sent { ok, failed }
    }
}

fn embed_color(action: Action) -> u32 {
    match action.polarity() {
        Polarity::Positive => COLOR_GREEN,
        Polarity::Negative => COLOR_RED,
        Polarity::Neutral => COLOR_BLUE,
    }
}

fn field(name: &str, value: String, inline: bool) -> Value {
    json!({ "name": format!("**{name}**"), "value": value, "inline": inline })
}

fn format_cap(cap_usd: f64) -> String {
    format!("${:.2}", cap_usd)
}

/// Discord webhook body with a single rich embed.
pub fn discord_payload(wallet_name: &str, event: &ClassifiedEvent, timestamp: &str) -> Value {
    let mut fields = Vec::new();

    match (&event.token, event.transferred_sol) {
        (Some(token), _) => {
            fields.push(field("Token Mint", token.mint.clone(), true));
            fields.push(field("Token Amount", token.amount.to_string(), false));
        }
        (None, Some(sol)) => {
            fields.push(field("Transferred", format!("{sol} SOL"), false));
        }
        (None, None) => {}
    }

    if let Some(counter) = &event.counter_token {
        fields.push(field("Received Mint", counter.mint.clone(), true));
        fields.push(field("Received Amount", counter.amount.to_string(), false));
    }

    fields.push(field("Sol Amount", format!("{} SOL", event.native_amount), false));

    if let Some(m) = &event.market {
        fields.push(field("Ticker", m.ticker.clone(), true));
        fields.push(field("Name", m.name.clone(), true));
        fields.push(field("Market Cap", format_cap(m.cap_usd), true));
    }

    fields.push(field(
        "Transaction",
        format!("[View Transaction]({})", event.explorer_url()),
        false,
    ));

    json!({
        "embeds": [{
            "title": format!("{} - {}", wallet_name, event.action),
            "color": embed_color(event.action),
            "fields": fields,
            "footer": { "text": "Transaction Notification" },
            "timestamp": timestamp,
        }]
    })
}

/// Flat text with the same facts as the embed.
pub fn plain_message(wallet_name: &str, event: &ClassifiedEvent) -> String {
    let mut lines = vec![format!("{} - {}", wallet_name, event.action)];

    if let Some(token) = &event.token {
        lines.push(format!("Token Mint: {}", token.mint));
        lines.push(format!("Token Amount: {}", token.amount));
    }
    if let Some(sol) = event.transferred_sol {
        lines.push(format!("Transferred: {sol} SOL"));
    }
    if let Some(counter) = &event.counter_token {
        lines.push(format!("Received: {} {}", counter.amount, counter.mint));
    }
    lines.push(format!("Sol Amount: {} SOL", event.native_amount));

    if let Some(m) = &event.market {
        lines.push(format!("{} ({}) mcap {}", m.name, m.ticker, format_cap(m.cap_usd)));
    }

    lines.push(format!("Transaction: {}", event.explorer_url()));
    lines.join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use schema::{MarketMetadata, TokenLeg};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP endpoint that records request bodies and answers every
    /// request with `status`.
    pub(crate) struct StubWebhook {
        pub url: String,
        pub bodies: Arc<Mutex<Vec<String>>>,
    }

    pub(crate) async fn spawn_stub(status: u16) -> StubWebhook {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let sink = bodies.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(body) = complete_body(&buf) {
                            sink.lock().unwrap().push(body);
                            break;
                        }
                    }
                    let resp = format!(
                        "HTTP/1.1 {status} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        StubWebhook {
            url: format!("http://{addr}/hook"),
            bodies,
        }
    }

    fn complete_body(buf: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(buf);
        let split = text.find("\r\n\r\n")?;
        let (head, rest) = text.split_at(split + 4);
        let len = head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        (rest.len() >= len).then(|| rest[..len].to_string())
    }

    pub(crate) fn event(action: Action, mint: &str, amount: f64) -> ClassifiedEvent {
        ClassifiedEvent {
            action,
            wallet: "Addr1".to_string(),
            token: Some(TokenLeg {
                mint: mint.to_string(),
                amount,
            }),
            counter_token: None,
            transferred_sol: None,
            native_amount: 0.5,
            signature: "sig1".to_string(),
            slot: 100,
            market: None,
        }
    }

    fn wallet() -> Wallet {
        Wallet::new("W1", "Addr1").unwrap()
    }

    fn notifier(destinations: Destinations, policy: DeliveryPolicy) -> WebhookNotifier {
        WebhookNotifier::new(destinations, policy, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_discord_payload_shape() {
        let mut e = event(Action::Bought, "Mint1", 5.0);
        e.market = Some(MarketMetadata {
            cap_usd: 12345.678,
            name: "Dog Coin".to_string(),
            ticker: "DOG".to_string(),
        });

        let v = discord_payload("W1", &e, "2024-06-10T00:00:00Z");
        let embed = &v["embeds"][0];

        assert_eq!(embed["title"], "W1 - BOUGHT");
        assert_eq!(embed["color"], COLOR_GREEN);
        assert_eq!(embed["timestamp"], "2024-06-10T00:00:00Z");

        let fields = embed["fields"].as_array().unwrap();
        let values: Vec<&str> = fields.iter().map(|f| f["value"].as_str().unwrap()).collect();
        assert!(values.contains(&"Mint1"));
        assert!(values.contains(&"5"));
        assert!(values.contains(&"0.5 SOL"));
        assert!(values.contains(&"DOG"));
        assert!(values.contains(&"$12345.68"));
        assert!(values.contains(&"[View Transaction](https://solscan.io/tx/sig1)"));
    }

    #[test]
    fn test_discord_color_follows_polarity() {
        let sold = discord_payload("W1", &event(Action::Sold, "M", 1.0), "t");
        assert_eq!(sold["embeds"][0]["color"], COLOR_RED);

        let swapped = discord_payload("W1", &event(Action::Swapped, "M", 1.0), "t");
        assert_eq!(swapped["embeds"][0]["color"], COLOR_BLUE);
    }

    #[test]
    fn test_plain_message_carries_same_facts() {
        let text = plain_message("W1", &event(Action::Sold, "Mint1", 2.5));
        assert!(text.starts_with("W1 - SOLD"));
        assert!(text.contains("Token Mint: Mint1"));
        assert!(text.contains("Token Amount: 2.5"));
        assert!(text.contains("Sol Amount: 0.5 SOL"));
        assert!(text.contains("https://solscan.io/tx/sig1"));
    }

    #[test]
    fn test_swaps_and_native_are_suppressed_by_default() {
        let policy = DeliveryPolicy::default();
        assert!(policy.admit(&event(Action::Swapped, "M", 1.0)).is_some());
        assert!(policy.admit(&event(Action::Received, "M", 1.0)).is_some());
        assert!(policy.admit(&event(Action::Bought, "M", 1.0)).is_none());
        assert!(policy.admit(&event(Action::Sold, "M", 1.0)).is_none());
    }

    #[test]
    fn test_ledger_gate_consistency() {
        let policy = DeliveryPolicy::new(false, false, SellGate::Ledger);
        let ledger = policy.ledger.clone().unwrap();

        assert!(policy.admit(&event(Action::Bought, "M", 5.0)).is_none());
        assert_eq!(ledger.held("M"), Some(5.0));

        // oversell is not delivered and leaves the ledger alone
        assert_eq!(
            policy.admit(&event(Action::Sold, "M", 6.0)),
            Some("sell exceeds tracked holdings")
        );
        assert_eq!(ledger.held("M"), Some(5.0));

        assert!(policy.admit(&event(Action::Sold, "M", 5.0)).is_none());
        assert_eq!(ledger.held("M"), None);
    }

    #[tokio::test]
    async fn test_delivers_to_both_destinations() {
        let discord = spawn_stub(204).await;
        let telegram = spawn_stub(200).await;
        let n = notifier(
            Destinations {
                discord: Some(discord.url.clone()),
                telegram: Some(telegram.url.clone()),
            },
            DeliveryPolicy::default(),
        );

        let d = n.notify(&wallet(), &event(Action::Bought, "Mint1", 5.0)).await;
        assert_eq!(d, Delivery::Sent { ok: 2, failed: 0 });

        let discord_bodies = discord.bodies.lock().unwrap().clone();
        assert_eq!(discord_bodies.len(), 1);
        let v: Value = serde_json::from_str(&discord_bodies[0]).unwrap();
        assert_eq!(v["embeds"][0]["title"], "W1 - BOUGHT");

        let telegram_bodies = telegram.bodies.lock().unwrap().clone();
        assert_eq!(telegram_bodies.len(), 1);
        let v: Value = serde_json::from_str(&telegram_bodies[0]).unwrap();
        assert!(v["text"].as_str().unwrap().contains("Mint1"));
    }

    #[tokio::test]
    async fn test_failing_destination_does_not_raise() {
        let broken = spawn_stub(500).await;
        let n = notifier(
            Destinations {
                discord: Some(broken.url.clone()),
                telegram: Some("http://127.0.0.1:1/unreachable".to_string()),
            },
            DeliveryPolicy::default(),
        );

        let d = n.notify(&wallet(), &event(Action::Sold, "Mint1", 1.0)).await;
        assert_eq!(d, Delivery::Sent { ok: 0, failed: 2 });
        assert_eq!(broken.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_event_makes_no_request() {
        let discord = spawn_stub(204).await;
        let n = notifier(
            Destinations {
                discord: Some(discord.url.clone()),
                telegram: None,
            },
            DeliveryPolicy::default(),
        );

        let d = n.notify(&wallet(), &event(Action::Swapped, "Mint1", 1.0)).await;
        assert_eq!(d, Delivery::Suppressed("swap notifications disabled"));
        assert!(discord.bodies.lock().unwrap().is_empty());
    }
}
