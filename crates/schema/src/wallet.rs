use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// A tracked address and its display label.
///
/// Identity is the address; names are labels only and may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub name: String,
    pub address: String,
}

impl Wallet {
    pub fn new(name: &str, address: &str) -> Result<Self, ValidationError> {
        let address: String = address.chars().filter(|c| !c.is_whitespace()).collect();
        if address.is_empty() {
            return Err(ValidationError::EmptyAddress {
                name: name.to_string(),
            });
        }

        let name = name.trim();
        let name = if name.is_empty() { address.as_str() } else { name };

        Ok(Self {
            name: name.to_string(),
            address,
        })
    }

    /// Re-run constructor validation on a wallet that came in through serde.
    pub fn validated(self) -> Result<Self, ValidationError> {
        Self::new(&self.name, &self.address)
    }
}
