//! Payment references: single-use correlation keys embedded in transactions.
//!
//! A reference is a freshly generated ledger address attached to the
//! transfer instruction as a read-only account. It moves no funds and signs
//! nothing; it exists so the resulting transaction can later be located by
//! the reference's signature history. References are created once per
//! expected payment and must never be reused after a match; the engine
//! relies on that to make re-polling idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_pubkey::Pubkey;

use crate::chain::{Address, AddressParseError};

/// An opaque, globally unique payment correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentReference(Address);

impl PaymentReference {
    /// The reference as a ledger address.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.0
    }

    /// The underlying public key.
    #[must_use]
    pub const fn pubkey(&self) -> &Pubkey {
        self.0.pubkey()
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentReference {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Address>().map(Self)
    }
}

impl Serialize for PaymentReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PaymentReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates payment references.
///
/// Stateless: the caller owns the mapping from reference to its own order
/// or run record. Uniqueness comes from 256 bits of CSPRNG output, far
/// beyond the collision horizon of any marketplace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceTracker;

impl ReferenceTracker {
    /// Creates a tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generates a fresh, single-use reference.
    #[must_use]
    pub fn create(&self) -> PaymentReference {
        let bytes: [u8; 32] = rand::random();
        PaymentReference(Address::new(Pubkey::new_from_array(bytes)))
    }
}
