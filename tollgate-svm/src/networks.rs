//! Known Solana networks and the marketplace settlement token per network.
//!
//! Networks are identified by the first 32 characters of their genesis
//! block hash, the same references wallets and facilitators use.

use solana_pubkey::pubkey;

use crate::chain::Address;

/// A Solana network the engine can settle against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Solana mainnet-beta.
    Mainnet,
    /// Solana devnet, used for test deployments.
    Devnet,
}

impl Network {
    /// Genesis-hash reference identifying this network.
    #[must_use]
    pub const fn genesis_reference(self) -> &'static str {
        match self {
            Self::Mainnet => "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
            Self::Devnet => "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        }
    }

    /// Public RPC endpoint used when the configuration does not name one.
    #[must_use]
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.mainnet-beta.solana.com",
            Self::Devnet => "https://api.devnet.solana.com",
        }
    }

    /// USDC mint used for settlement on this network.
    ///
    /// Mainnet: native Circle USDC (SPL Token).
    /// Verify: <https://solscan.io/token/EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v>
    ///
    /// Devnet: Circle's USDC test deployment.
    /// Verify: <https://explorer.solana.com/address/4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU?cluster=devnet>
    #[must_use]
    pub const fn settlement_mint(self) -> Address {
        match self {
            Self::Mainnet => Address::new(pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v")),
            Self::Devnet => Address::new(pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU")),
        }
    }

    /// Decimal places of the settlement mint (USDC uses 6 on both networks).
    #[must_use]
    pub const fn settlement_decimals(self) -> u8 {
        6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks_have_distinct_references_and_mints() {
        assert_ne!(
            Network::Mainnet.genesis_reference(),
            Network::Devnet.genesis_reference()
        );
        assert_ne!(
            Network::Mainnet.settlement_mint(),
            Network::Devnet.settlement_mint()
        );
    }
}
