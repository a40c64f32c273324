//! The engine context: one explicit object, built at startup.
//!
//! Everything a caller needs (RPC handle, verifier, builder, broadcaster,
//! tier lookup, reference tracker) hangs off [`EngineContext`]. It is
//! constructed once from an [`EngineConfig`] and passed into call sites
//! explicitly; there is no module-level connection or config singleton,
//! and teardown is dropping the context.

use std::sync::Arc;

use tollgate::RetryPolicy;
use tollgate::error::VerifyResult;

use crate::broadcast::TemplateBroadcaster;
use crate::build::TransactionBuilder;
use crate::config::EngineConfig;
use crate::holdings::TierLookup;
use crate::reference::{PaymentReference, ReferenceTracker};
use crate::rpc::{LedgerRpc, SolanaLedgerRpc};
use crate::types::{TransferExpectation, VerificationResult};
use crate::verify::PaymentVerifier;

/// Shared engine state for one process.
pub struct EngineContext {
    config: EngineConfig,
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    references: ReferenceTracker,
    verifier: PaymentVerifier,
    builder: TransactionBuilder,
    broadcaster: TemplateBroadcaster,
    tiers: TierLookup,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Builds a context over the configured RPC endpoint.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let rpc: Arc<dyn LedgerRpc> = Arc::new(SolanaLedgerRpc::new(
            &config.rpc_endpoint(),
            config.commitment,
        ));
        Self::with_rpc(config, rpc)
    }

    /// Builds a context over a caller-supplied RPC implementation. Used by
    /// tests and by deployments with custom transports.
    #[must_use]
    pub fn with_rpc(config: EngineConfig, rpc: Arc<dyn LedgerRpc>) -> Self {
        let retry = config.retry_policy();
        let verifier = PaymentVerifier::new(
            Arc::clone(&rpc),
            retry,
            config.commitment,
            config.poll_interval(),
        );
        let builder = TransactionBuilder::new(Arc::clone(&rpc), retry);
        let broadcaster = TemplateBroadcaster::new(Arc::clone(&rpc), retry);
        let tiers = TierLookup::new(Arc::clone(&rpc), retry, config.settlement_mint());
        Self {
            config,
            rpc,
            retry,
            references: ReferenceTracker::new(),
            verifier,
            builder,
            broadcaster,
            tiers,
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared RPC handle.
    #[must_use]
    pub fn rpc(&self) -> Arc<dyn LedgerRpc> {
        Arc::clone(&self.rpc)
    }

    /// The engine-wide retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Generates a fresh payment reference.
    #[must_use]
    pub fn new_reference(&self) -> PaymentReference {
        self.references.create()
    }

    /// The payment verifier.
    #[must_use]
    pub const fn verifier(&self) -> &PaymentVerifier {
        &self.verifier
    }

    /// The template builder.
    #[must_use]
    pub const fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// The reward/refund broadcaster.
    #[must_use]
    pub const fn broadcaster(&self) -> &TemplateBroadcaster {
        &self.broadcaster
    }

    /// The tier lookup over the settlement mint.
    #[must_use]
    pub const fn tiers(&self) -> &TierLookup {
        &self.tiers
    }

    /// Verifies an expected payment under the configured deadline.
    ///
    /// # Errors
    ///
    /// See [`PaymentVerifier::verify`].
    pub async fn verify_payment(
        &self,
        expectation: &TransferExpectation,
    ) -> VerifyResult<VerificationResult> {
        self.verifier
            .verify(expectation, self.config.verify_deadline())
            .await
    }
}
