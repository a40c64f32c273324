//! Advancing a located signature to the target commitment.
//!
//! The waiter is a small state machine:
//!
//! ```text
//! SEARCHING ──signature found──▶ FOUND_PENDING ──target commitment──▶ CONFIRMED
//!     │                              │
//!     │ deadline                     │ execution error
//!     ▼                              ▼
//! TIMED_OUT                        FAILED
//! ```
//!
//! `FAILED` and `TIMED_OUT` are both terminal but mean different things:
//! `FAILED` is a payment that was attempted and rejected by the network
//! (refund territory), `TIMED_OUT` is no payment attempt observed at all
//! (re-prompt territory). A failed transaction is never retried into
//! success; the ledger has already recorded its rejection.

use std::sync::Arc;
use std::time::Duration;

use solana_signature::Signature;
use tokio::time::{Instant, sleep};
use tollgate::RetryPolicy;
use tollgate::error::{VerifyError, VerifyErrorKind, VerifyResult};
use tracing::debug;

use crate::chain::Commitment;
use crate::locate::{LocateOutcome, PaymentLocator};
use crate::reference::PaymentReference;
use crate::rpc::{LedgerRpc, SignatureStatus};

/// States of a confirmation wait. Terminal: `Confirmed`, `Failed`, `TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// No signature observed yet.
    Searching,
    /// A signature exists but has not reached the target commitment.
    FoundPending {
        /// The located signature.
        signature: Signature,
    },
    /// The signature reached the target commitment with no execution error.
    Confirmed {
        /// The confirmed signature.
        signature: Signature,
        /// Slot the transaction was processed in.
        slot: u64,
    },
    /// The ledger recorded an execution error for the signature. Terminal.
    Failed {
        /// The failed signature.
        signature: Signature,
        /// The recorded execution error.
        error: String,
    },
    /// Deadline elapsed with no signature observed. Terminal.
    TimedOut,
}

impl WaitState {
    /// Pure transition from `FoundPending` on a status observation.
    ///
    /// Stays pending while the ledger has not caught up; moves to `Failed`
    /// on any recorded execution error; moves to `Confirmed` once the
    /// reported commitment reaches `target`.
    #[must_use]
    pub fn apply_status(self, status: Option<&SignatureStatus>, target: Commitment) -> Self {
        let Self::FoundPending { signature } = self else {
            return self;
        };
        let Some(status) = status else {
            return Self::FoundPending { signature };
        };
        if let Some(error) = &status.err {
            return Self::Failed {
                signature,
                error: error.clone(),
            };
        }
        match status.commitment {
            Some(commitment) if commitment >= target => Self::Confirmed {
                signature,
                slot: status.slot,
            },
            _ => Self::FoundPending { signature },
        }
    }

    /// Whether this state ends the wait.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::Failed { .. } | Self::TimedOut
        )
    }
}

/// Waits for a reference's transaction to reach a target commitment.
pub struct ConfirmationWaiter {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    poll_interval: Duration,
    target: Commitment,
}

impl std::fmt::Debug for ConfirmationWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationWaiter")
            .field("poll_interval", &self.poll_interval)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl ConfirmationWaiter {
    /// Creates a waiter targeting `target` commitment.
    #[must_use]
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        retry: RetryPolicy,
        poll_interval: Duration,
        target: Commitment,
    ) -> Self {
        Self {
            rpc,
            retry,
            poll_interval,
            target,
        }
    }

    /// Drives the state machine to a terminal state under one `deadline`
    /// covering both the search and the confirmation wait.
    ///
    /// If a signature was located but did not reach the target before the
    /// deadline, the wait surfaces a timeout *error* carrying the signature
    /// (distinct from [`WaitState::TimedOut`], which means no signature was
    /// observed); the caller may start a fresh wait on the same reference.
    ///
    /// # Errors
    ///
    /// Returns an error on exhausted/non-retryable RPC failures or on a
    /// located-but-unconfirmed deadline expiry.
    pub async fn wait(
        &self,
        locator: &PaymentLocator,
        reference: &PaymentReference,
        deadline: Duration,
    ) -> VerifyResult<WaitState> {
        let started = Instant::now();

        let signature = match locator.locate(reference, deadline).await? {
            LocateOutcome::Located(signature) => signature,
            LocateOutcome::Timeout => return Ok(WaitState::TimedOut),
        };
        let mut state = WaitState::FoundPending { signature };
        debug!(reference = %reference, signature = %signature, "signature found, awaiting commitment");

        loop {
            let status = self
                .retry
                .execute(|| async { self.rpc.signature_status(&signature).await })
                .await
                .map_err(|failure| {
                    VerifyError::from(failure)
                        .with_reference(reference.to_string())
                        .with_signature(signature.to_string())
                })?;

            state = state.apply_status(status.as_ref(), self.target);
            if state.is_terminal() {
                return Ok(state);
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(VerifyError::new(VerifyErrorKind::Timeout)
                    .with_reference(reference.to_string())
                    .with_signature(signature.to_string()));
            }
            sleep(self.poll_interval.min(deadline - elapsed)).await;
        }
    }
}
