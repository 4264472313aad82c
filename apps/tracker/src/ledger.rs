//! Process-wide token holdings built from observed buys and sells.
//!
//! Best-effort only: it never reconciles against on-chain balances, it only
//! gates sell notifications on what this process has seen bought.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Relative slack for comparing fractional UI amounts.
const DUST: f64 = 1e-9;

fn tolerance(a: f64, b: f64) -> f64 {
    DUST * a.abs().max(b.abs()).max(1.0)
}

#[derive(Debug, Default)]
pub struct TokenLedger {
    held: Mutex<HashMap<String, f64>>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, mint: &str, amount: f64) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held.entry(mint.to_string()).or_insert(0.0) += amount;
    }

    /// Debit `amount` if at least that much is held, within float dust. The
    /// entry is dropped once what is left is dust. Returns false and leaves the
    /// ledger untouched otherwise.
    pub fn try_debit(&self, mint: &str, amount: f64) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(balance) = held.get_mut(mint) else {
            return false;
        };
        let tol = tolerance(*balance, amount);
        if amount - *balance > tol {
            return false;
        }

        *balance -= amount;
        if *balance <= tol {
            held.remove(mint);
        }
        true
    }

    pub fn held(&self, mint: &str) -> Option<f64> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.get(mint).copied()
    }
}
