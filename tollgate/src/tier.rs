//! Holder tiers and discount quoting.
//!
//! A holder's marketplace-token balance maps to a tier over fixed ascending
//! thresholds, and a tier maps to a fixed discount percentage. Both mappings
//! are total `match` expressions, so no tier can fall through to an
//! undefined discount. Everything here is pure; reading the actual on-chain
//! balance is a separate, retryable operation in the chain crate.

use serde::{Deserialize, Serialize};

/// Balance required for [`Tier::Bronze`], in whole tokens.
pub const BRONZE_THRESHOLD: u64 = 1_000;
/// Balance required for [`Tier::Silver`], in whole tokens.
pub const SILVER_THRESHOLD: u64 = 10_000;
/// Balance required for [`Tier::Gold`], in whole tokens.
pub const GOLD_THRESHOLD: u64 = 50_000;
/// Balance required for [`Tier::Diamond`], in whole tokens.
pub const DIAMOND_THRESHOLD: u64 = 100_000;

/// Holder tier derived from a token balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Below every threshold; no discount.
    None,
    /// At least 1,000 tokens.
    Bronze,
    /// At least 10,000 tokens.
    Silver,
    /// At least 50,000 tokens.
    Gold,
    /// At least 100,000 tokens.
    Diamond,
}

impl Tier {
    /// Maps a whole-token balance to its tier.
    ///
    /// Monotonic non-decreasing in `balance`.
    #[must_use]
    pub const fn for_balance(balance: u64) -> Self {
        if balance >= DIAMOND_THRESHOLD {
            Self::Diamond
        } else if balance >= GOLD_THRESHOLD {
            Self::Gold
        } else if balance >= SILVER_THRESHOLD {
            Self::Silver
        } else if balance >= BRONZE_THRESHOLD {
            Self::Bronze
        } else {
            Self::None
        }
    }

    /// Discount percentage for this tier, in whole percent.
    #[must_use]
    pub const fn discount_percent(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Bronze => 10,
            Self::Silver => 20,
            Self::Gold => 30,
            Self::Diamond => 40,
        }
    }
}

/// A holder's balance together with the tier it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    /// Whole-token balance the tier was derived from.
    pub balance: u64,
    /// Derived tier.
    pub tier: Tier,
}

impl TierInfo {
    /// Derives tier info from a whole-token balance.
    #[must_use]
    pub const fn for_balance(balance: u64) -> Self {
        Self {
            balance,
            tier: Tier::for_balance(balance),
        }
    }
}

/// A deterministic price quote after applying a tier discount.
///
/// All amounts are integer atomic units; `final_price + savings` always
/// equals `base_price` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuote {
    /// Undiscounted price in atomic units.
    pub base_price: u64,
    /// Tier the discount was taken from.
    pub tier: Tier,
    /// Applied discount in whole percent.
    pub discount_percent: u64,
    /// Price after discount, in atomic units.
    pub final_price: u64,
    /// Atomic units saved relative to the base price.
    pub savings: u64,
}

impl DiscountQuote {
    /// Quotes `base_price` under `tier`'s discount.
    ///
    /// Savings are computed first with floor division; the final price is
    /// the exact remainder, so the two always sum back to the base price.
    #[must_use]
    pub const fn quote(base_price: u64, tier: Tier) -> Self {
        let discount_percent = tier.discount_percent();
        let savings = base_price / 100 * discount_percent
            + (base_price % 100) * discount_percent / 100;
        Self {
            base_price,
            tier,
            discount_percent,
            final_price: base_price - savings,
            savings,
        }
    }
}
