//! The verification orchestrator: locate, confirm, validate, cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tollgate::error::{VerifyError, VerifyErrorKind, VerifyResult};
use tollgate::{RetryPolicy, RpcErrorKind, UnixTimestamp};
use tracing::{debug, info, warn};

use crate::chain::Commitment;
use crate::confirm::{ConfirmationWaiter, WaitState};
use crate::locate::PaymentLocator;
use crate::reference::PaymentReference;
use crate::rpc::LedgerRpc;
use crate::types::{TransferExpectation, VerificationResult};
use crate::validate::TransferValidator;

/// Verifies that expected payments landed on the ledger.
///
/// Independent verifications for different references run as fully
/// independent tasks over the shared RPC handle; nothing here requires
/// mutual exclusion, because all ledger access is read-only. Results are
/// cached per reference: a reference is single-use, so once matched its
/// result is final and re-queries return the identical
/// [`VerificationResult`] without touching the network.
pub struct PaymentVerifier {
    locator: PaymentLocator,
    waiter: ConfirmationWaiter,
    validator: TransferValidator,
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    verified: DashMap<PaymentReference, VerificationResult>,
    #[cfg(feature = "dev-bypass")]
    bypass: bool,
}

impl std::fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("verified", &self.verified.len())
            .finish_non_exhaustive()
    }
}

impl PaymentVerifier {
    /// Creates a verifier targeting `commitment`, polling at
    /// `poll_interval`.
    #[must_use]
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        retry: RetryPolicy,
        commitment: Commitment,
        poll_interval: Duration,
    ) -> Self {
        Self {
            locator: PaymentLocator::new(Arc::clone(&rpc), retry, poll_interval),
            waiter: ConfirmationWaiter::new(Arc::clone(&rpc), retry, poll_interval, commitment),
            validator: TransferValidator::default(),
            rpc,
            retry,
            verified: DashMap::new(),
            #[cfg(feature = "dev-bypass")]
            bypass: false,
        }
    }

    /// Enables the development-only verification bypass.
    ///
    /// Only compiled into debug builds of the `dev-bypass` feature; release
    /// artifacts cannot contain this code path at all.
    #[cfg(feature = "dev-bypass")]
    #[must_use]
    pub const fn with_bypass(mut self) -> Self {
        self.bypass = true;
        self
    }

    /// Runs a full locate-and-confirm-and-validate cycle for `expectation`
    /// under `deadline`.
    ///
    /// Re-verifying an already-matched reference returns the cached result
    /// unchanged; there is no double counting. Cancelling the returned
    /// future abandons the wait, and a later call with the same reference
    /// is safe and idempotent.
    ///
    /// # Errors
    ///
    /// One of the terminal taxonomy kinds: a timeout when nothing was
    /// observed, an on-chain execution failure for a rejected payment
    /// attempt, a validation mismatch for a non-matching transfer, a
    /// configuration error for an unsatisfiable expectation, or a
    /// classified RPC error.
    pub async fn verify(
        &self,
        expectation: &TransferExpectation,
        deadline: Duration,
    ) -> VerifyResult<VerificationResult> {
        expectation.validate()?;

        if let Some(result) = self.verified.get(&expectation.reference) {
            debug!(reference = %expectation.reference, "returning cached verification");
            return Ok(*result);
        }

        #[cfg(feature = "dev-bypass")]
        if self.bypass {
            warn!(
                reference = %expectation.reference,
                "PAYMENT VERIFICATION BYPASSED (dev-bypass build)"
            );
            let result = VerificationResult {
                signature: solana_signature::Signature::default(),
                validated_amount: expectation.amount,
                timestamp: UnixTimestamp::now(),
            };
            self.verified.insert(expectation.reference, result);
            return Ok(result);
        }

        let state = self
            .waiter
            .wait(&self.locator, &expectation.reference, deadline)
            .await?;

        let (signature, slot) = match state {
            WaitState::Confirmed { signature, slot } => (signature, slot),
            WaitState::Failed { signature, error } => {
                warn!(
                    reference = %expectation.reference,
                    signature = %signature,
                    error = %error,
                    "payment attempt rejected by the network"
                );
                return Err(VerifyError::new(VerifyErrorKind::OnChainExecutionFailure(
                    error,
                ))
                .with_reference(expectation.reference.to_string())
                .with_signature(signature.to_string()));
            }
            WaitState::TimedOut => {
                return Err(VerifyError::new(VerifyErrorKind::Timeout)
                    .with_reference(expectation.reference.to_string()));
            }
            WaitState::Searching | WaitState::FoundPending { .. } => {
                // The waiter only returns terminal states; a non-terminal
                // state here is a bug in the waiter.
                return Err(VerifyError::new(VerifyErrorKind::NotFoundYet)
                    .with_reference(expectation.reference.to_string()));
            }
        };

        let record = self
            .retry
            .execute(|| async { self.rpc.transaction(&signature).await })
            .await
            .map_err(|failure| {
                VerifyError::from(failure)
                    .with_reference(expectation.reference.to_string())
                    .with_signature(signature.to_string())
            })?
            .ok_or_else(|| {
                // Confirmed by status but not yet served by this node.
                VerifyError::new(VerifyErrorKind::Rpc(RpcErrorKind::NodeBehind))
                    .with_reference(expectation.reference.to_string())
                    .with_signature(signature.to_string())
            })?;

        let validated_amount = self.validator.validate(&record, expectation)?;

        let result = VerificationResult {
            signature,
            validated_amount,
            timestamp: UnixTimestamp::now(),
        };
        // First writer wins: concurrent verifications of the same reference
        // converge on one result.
        let result = *self
            .verified
            .entry(expectation.reference)
            .or_insert(result);
        info!(
            reference = %expectation.reference,
            signature = %signature,
            slot,
            amount = validated_amount,
            "payment verified"
        );
        Ok(result)
    }

    /// Returns the cached result for a reference, if it was ever verified.
    #[must_use]
    pub fn cached(&self, reference: &PaymentReference) -> Option<VerificationResult> {
        self.verified.get(reference).map(|r| *r)
    }
}
