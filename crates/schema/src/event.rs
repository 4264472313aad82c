use serde::{Deserialize, Serialize};
use std::fmt;

pub const EXPLORER_TX_URL: &str = "https://solscan.io/tx/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Bought,
    Sold,
    Sent,
    Received,
    Swapped,
}

/// Direction of value for the tracked wallet, used for message styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Bought => "BOUGHT",
            Action::Sold => "SOLD",
            Action::Sent => "SENT",
            Action::Received => "RECEIVED",
            Action::Swapped => "SWAPPED",
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Action::Bought | Action::Received => Polarity::Positive,
            Action::Sold | Action::Sent => Polarity::Negative,
            Action::Swapped => Polarity::Neutral,
        }
    }

    /// Token buys and sells, the only actions that get market metadata.
    pub fn is_trade(&self) -> bool {
        matches!(self, Action::Bought | Action::Sold)
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Action::Sent | Action::Received)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a token movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLeg {
    pub mint: String,
    pub amount: f64,
}

/// Market data for a token mint, as reported by the metadata service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub cap_usd: f64,
    pub name: String,
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub action: Action,

    /// Tracked wallet address
    pub wallet: String,

    /// Token moved (outgoing leg for swaps)
    pub token: Option<TokenLeg>,

    /// Incoming leg of a swap
    pub counter_token: Option<TokenLeg>,

    /// SOL moved by a native transfer
    pub transferred_sol: Option<f64>,

    /// Absolute SOL balance change of the wallet in this transaction
    pub native_amount: f64,

    pub signature: String,
    pub slot: u64,

    pub market: Option<MarketMetadata>,
}

impl ClassifiedEvent {
    pub fn explorer_url(&self) -> String {
        format!("{}{}", EXPLORER_TX_URL, self.signature)
    }

    pub fn mint(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.mint.as_str())
    }

    pub fn token_amount(&self) -> Option<f64> {
        self.token.as_ref().map(|t| t.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_polarity() {
        assert_eq!(Action::Bought.polarity(), Polarity::Positive);
        assert_eq!(Action::Received.polarity(), Polarity::Positive);
        assert_eq!(Action::Sold.polarity(), Polarity::Negative);
        assert_eq!(Action::Sent.polarity(), Polarity::Negative);
        assert_eq!(Action::Swapped.polarity(), Polarity::Neutral);
    }

    #[test]
    fn test_action_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Action::Bought).unwrap(), "\"BOUGHT\"");
        assert_eq!(Action::Swapped.to_string(), "SWAPPED");
    }
}
