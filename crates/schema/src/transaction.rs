//! Enhanced transaction records as returned by the indexing API.
//!
//! Only the fields the tracker consumes are modelled; everything else in the
//! payload is ignored by serde.

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: f64 = 1e9;

/// Transaction type tag. Anything the tracker does not act on maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Transfer,
    Swap,
    #[serde(other)]
    Unknown,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Transfer => "TRANSFER",
            TxType::Swap => "SWAP",
            TxType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: String,

    /// UI amount (decimals already applied)
    #[serde(default)]
    pub token_amount: f64,

    #[serde(default)]
    pub from_user_account: Option<String>,

    #[serde(default)]
    pub to_user_account: Option<String>,
}

impl TokenTransfer {
    pub fn is_from(&self, address: &str) -> bool {
        self.from_user_account.as_deref() == Some(address)
    }

    pub fn is_to(&self, address: &str) -> bool {
        self.to_user_account.as_deref() == Some(address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTransfer {
    /// Lamports
    #[serde(default)]
    pub amount: u64,

    #[serde(default)]
    pub from_user_account: Option<String>,

    #[serde(default)]
    pub to_user_account: Option<String>,
}

impl NativeTransfer {
    pub fn is_from(&self, address: &str) -> bool {
        self.from_user_account.as_deref() == Some(address)
    }

    pub fn is_to(&self, address: &str) -> bool {
        self.to_user_account.as_deref() == Some(address)
    }

    pub fn amount_sol(&self) -> f64 {
        self.amount as f64 / LAMPORTS_PER_SOL
    }
}

/// Per-account balance movement within one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account: String,

    /// Lamports, signed
    #[serde(default)]
    pub native_balance_change: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub signature: String,
    pub slot: u64,

    #[serde(rename = "type")]
    pub tx_type: TxType,

    #[serde(default)]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,

    #[serde(default)]
    pub native_transfers: Vec<NativeTransfer>,

    #[serde(default)]
    pub account_data: Vec<AccountData>,
}

impl RawTransaction {
    /// Guard applied before a record enters the pipeline.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.signature.trim().is_empty() {
            return Err(ValidationError::EmptySignature { slot: self.slot });
        }
        if self.slot == 0 {
            return Err(ValidationError::ZeroSlot {
                signature: self.signature.clone(),
            });
        }
        Ok(())
    }

    /// Absolute SOL balance change of `address`, rounded to 4 decimals.
    /// Returns 0.0 when the address has no account entry.
    pub fn native_change_sol(&self, address: &str) -> f64 {
        self.account_data
            .iter()
            .find(|a| a.account == address)
            .map(|a| round4(a.native_balance_change.unsigned_abs() as f64 / LAMPORTS_PER_SOL))
            .unwrap_or(0.0)
    }
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
