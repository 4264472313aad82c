pub mod classify;
pub mod error;
pub mod event;
pub mod transaction;
pub mod wallet;

// Wallet-relative classification
pub use classify::classify;

pub use error::ValidationError;

// Classified events
pub use event::{Action, ClassifiedEvent, MarketMetadata, Polarity, TokenLeg, EXPLORER_TX_URL};

// Enhanced transaction records
pub use transaction::{
    AccountData, NativeTransfer, RawTransaction, TokenTransfer, TxType, LAMPORTS_PER_SOL,
};

pub use wallet::Wallet;
