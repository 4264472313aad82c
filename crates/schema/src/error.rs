use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("wallet {name:?} has an empty address")]
    EmptyAddress { name: String },

    #[error("transaction at slot {slot} has an empty signature")]
    EmptySignature { slot: u64 },

    #[error("transaction {signature} has slot 0")]
    ZeroSlot { signature: String },
}
