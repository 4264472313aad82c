//! Wallet-relative classification of enhanced transactions.
//!
//! Pure: no I/O, no clock. Market metadata is attached later by the caller.

use crate::event::{Action, ClassifiedEvent, TokenLeg};
use crate::transaction::{RawTransaction, TokenTransfer, TxType};

/// Classify `tx` from the point of view of `wallet`.
///
/// Events come out in sub-record order: token transfers first, then native
/// transfers. Amounts are not filtered, zero-amount transfers still emit.
pub fn classify(tx: &RawTransaction, wallet: &str) -> Vec<ClassifiedEvent> {
    let native_amount = tx.native_change_sol(wallet);
    let base = |action: Action| ClassifiedEvent {
        action,
        wallet: wallet.to_string(),
        token: None,
        counter_token: None,
        transferred_sol: None,
        native_amount,
        signature: tx.signature.clone(),
        slot: tx.slot,
        market: None,
    };

    match tx.tx_type {
        TxType::Swap => classify_swap(tx, wallet)
            .map(|(out_leg, in_leg)| ClassifiedEvent {
                token: Some(out_leg),
                counter_token: in_leg,
                ..base(Action::Swapped)
            })
            .into_iter()
            .collect(),

        TxType::Transfer => {
            let mut out = Vec::new();

            for t in &tx.token_transfers {
                // destination wins when a wallet sends to itself
                let action = if t.is_to(wallet) {
                    Action::Bought
                } else if t.is_from(wallet) {
                    Action::Sold
                } else {
                    continue;
                };
                out.push(ClassifiedEvent {
                    token: Some(leg(t)),
                    ..base(action)
                });
            }

            for n in &tx.native_transfers {
                let action = if n.is_to(wallet) {
                    Action::Received
                } else if n.is_from(wallet) {
                    Action::Sent
                } else {
                    continue;
                };
                out.push(ClassifiedEvent {
                    transferred_sol: Some(n.amount_sol()),
                    ..base(action)
                });
            }

            out
        }

        TxType::Unknown => Vec::new(),
    }
}

/// Outgoing leg is the first transfer leaving the wallet. Incoming leg is the
/// first transfer into the wallet, falling back to the next other transfer.
fn classify_swap(tx: &RawTransaction, wallet: &str) -> Option<(TokenLeg, Option<TokenLeg>)> {
    let out_idx = tx.token_transfers.iter().position(|t| t.is_from(wallet))?;

    let in_leg = tx
        .token_transfers
        .iter()
        .enumerate()
        .find(|(i, t)| *i != out_idx && t.is_to(wallet))
        .or_else(|| {
            tx.token_transfers
                .iter()
                .enumerate()
                .find(|(i, _)| *i != out_idx)
        })
        .map(|(_, t)| leg(t));

    Some((leg(&tx.token_transfers[out_idx]), in_leg))
}

fn leg(t: &TokenTransfer) -> TokenLeg {
    TokenLeg {
        mint: t.mint.clone(),
        amount: t.token_amount,
    }
}
