//! Locating the transaction that carries a payment reference.

use std::sync::Arc;
use std::time::Duration;

use solana_signature::Signature;
use tokio::time::{Instant, sleep};
use tollgate::RetryPolicy;
use tollgate::error::VerifyResult;
use tracing::debug;

use crate::chain::Commitment;
use crate::reference::PaymentReference;
use crate::rpc::{LedgerRpc, SignatureRecord};

/// How many history entries to request per poll. Resubmission noise rarely
/// produces more than a handful of signatures per reference.
const HISTORY_LIMIT: usize = 10;

/// Outcome of a locate attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateOutcome {
    /// A signature referencing the key was found at ≥ confirmed.
    Located(Signature),
    /// The deadline elapsed without a usable signature.
    Timeout,
}

/// Polls the ledger's signature history for a reference address.
pub struct PaymentLocator {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl std::fmt::Debug for PaymentLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentLocator")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PaymentLocator {
    /// Creates a locator polling at `poll_interval` (1–2s is typical).
    #[must_use]
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryPolicy, poll_interval: Duration) -> Self {
        Self {
            rpc,
            retry,
            poll_interval,
        }
    }

    /// Polls until a signature for `reference` appears or `deadline` elapses.
    ///
    /// Returns the most recent signature whose reported commitment is at
    /// least `confirmed`: resubmission noise means several may exist, and
    /// the newest confirmed one is the settlement candidate. Entries below
    /// `processed` never surface here (the adapter does not return them).
    /// Failed transactions are *not* filtered out: a located signature with
    /// an execution error must surface as an on-chain failure downstream,
    /// not be silently skipped.
    ///
    /// Cancelling the returned future abandons the wait; the reference is
    /// single-use once matched, so a later call with the same reference is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error when polling fails with a non-retryable RPC error
    /// or exhausts the retry budget.
    pub async fn locate(
        &self,
        reference: &PaymentReference,
        deadline: Duration,
    ) -> VerifyResult<LocateOutcome> {
        let started = Instant::now();
        let address = *reference.address();

        loop {
            let records = self
                .retry
                .execute(|| async {
                    self.rpc
                        .signatures_for_address(&address, HISTORY_LIMIT)
                        .await
                })
                .await
                .map_err(|failure| {
                    tollgate::VerifyError::from(failure).with_reference(reference.to_string())
                })?;

            if let Some(record) = pick_candidate(&records) {
                debug!(
                    reference = %reference,
                    signature = %record.signature,
                    slot = record.slot,
                    "located payment candidate"
                );
                return Ok(LocateOutcome::Located(record.signature));
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                debug!(reference = %reference, ?deadline, "no signature before deadline");
                return Ok(LocateOutcome::Timeout);
            }
            sleep(self.poll_interval.min(deadline - elapsed)).await;
        }
    }
}

/// Newest record at ≥ confirmed, or `None` to keep polling.
///
/// History is newest-first; an absent commitment field marks an entry from
/// a node that predates the field, which only ever reported finalized
/// history.
fn pick_candidate(records: &[SignatureRecord]) -> Option<&SignatureRecord> {
    records
        .iter()
        .find(|r| r.commitment.unwrap_or(Commitment::Finalized) >= Commitment::Confirmed)
}
