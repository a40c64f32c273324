//! On-chain balance lookups feeding the tier engine.
//!
//! Tier derivation itself is a pure function in the core crate; this module
//! is the retryable, network-bound step that reads a holder's actual token
//! balance and converts it to whole tokens before the pure mapping runs.

use std::sync::Arc;

use tollgate::error::{VerifyError, VerifyResult};
use tollgate::{DiscountQuote, RetryPolicy, Tier, TierInfo};
use tracing::debug;

use crate::build::derive_token_account;
use crate::chain::Address;
use crate::rpc::LedgerRpc;

/// Reads holder balances and derives tiers and discount quotes.
pub struct TierLookup {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    mint: Address,
}

impl std::fmt::Debug for TierLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierLookup")
            .field("mint", &self.mint)
            .finish_non_exhaustive()
    }
}

impl TierLookup {
    /// Creates a lookup over the marketplace token `mint`.
    #[must_use]
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryPolicy, mint: Address) -> Self {
        Self { rpc, retry, mint }
    }

    /// Whole-token balance of `holder` for the marketplace mint.
    ///
    /// A holder with no token account simply has a zero balance; that is a
    /// valid tier input, not an error.
    ///
    /// # Errors
    ///
    /// Returns classified RPC errors from the balance lookup.
    pub async fn whole_token_balance(&self, holder: &Address) -> VerifyResult<u64> {
        let mint_info = self
            .retry
            .execute(|| async { self.rpc.mint_info(&self.mint).await })
            .await
            .map_err(VerifyError::from)?;

        let token_account = derive_token_account(holder, &mint_info.token_program, &self.mint);
        let exists = self
            .retry
            .execute(|| async { self.rpc.account_exists(&token_account).await })
            .await
            .map_err(VerifyError::from)?;
        if !exists {
            return Ok(0);
        }

        let base_units = self
            .retry
            .execute(|| async { self.rpc.token_account_balance(&token_account).await })
            .await
            .map_err(VerifyError::from)?;
        Ok(base_units / 10u64.pow(u32::from(mint_info.decimals)))
    }

    /// Derives the holder's tier from their live balance.
    ///
    /// # Errors
    ///
    /// Returns classified RPC errors from the balance lookup.
    pub async fn holder_tier(&self, holder: &Address) -> VerifyResult<TierInfo> {
        let balance = self.whole_token_balance(holder).await?;
        let info = TierInfo::for_balance(balance);
        debug!(holder = %holder, balance, tier = ?info.tier, "derived holder tier");
        Ok(info)
    }

    /// Quotes `base_price` (atomic units) under the holder's live tier.
    ///
    /// # Errors
    ///
    /// Returns classified RPC errors from the balance lookup.
    pub async fn quote(&self, holder: &Address, base_price: u64) -> VerifyResult<DiscountQuote> {
        let info = self.holder_tier(holder).await?;
        Ok(DiscountQuote::quote(base_price, info.tier))
    }

    /// Quotes without a network round trip when the tier is already known.
    #[must_use]
    pub const fn quote_for_tier(base_price: u64, tier: Tier) -> DiscountQuote {
        DiscountQuote::quote(base_price, tier)
    }
}
