//! Signing and submitting reward/refund templates from service-held keys.
//!
//! Ledger reads are idempotent and never serialized, but broadcasts from a
//! shared signing identity are: interleaved blockhash binding and
//! sequencing from one fee payer can produce conflicting or duplicate
//! transfers. Each signer gets its own async lock, so concurrent
//! broadcasts from different identities still proceed in parallel.
//!
//! End-user payments never pass through here; user wallets sign and
//! broadcast externally. This path exists for the service and platform
//! identities behind reward and refund templates.

use std::sync::Arc;

use dashmap::DashMap;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use tokio::sync::Mutex;
use tollgate::RetryPolicy;
use tollgate::error::{VerifyError, VerifyResult};
use tracing::{debug, warn};

use crate::build::TransactionTemplate;
use crate::rpc::LedgerRpc;

/// Signs templates and submits them, serializing per signing identity.
pub struct TemplateBroadcaster {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    locks: DashMap<Pubkey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for TemplateBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateBroadcaster")
            .field("active_signers", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl TemplateBroadcaster {
    /// Creates a broadcaster.
    #[must_use]
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            retry,
            locks: DashMap::new(),
        }
    }

    /// Signs `template` with `signer` and submits it, holding the signer's
    /// queue slot for the duration of the submission.
    ///
    /// Resubmission on transient failure is safe: the signature is fixed by
    /// the bound blockhash, and the ledger deduplicates identical
    /// transactions.
    ///
    /// # Errors
    ///
    /// Configuration errors when the signer is not among the template's
    /// required signers or the result is undersigned; classified RPC errors
    /// from submission.
    pub async fn sign_and_send<S: Signer + Sync>(
        &self,
        template: TransactionTemplate,
        signer: &S,
    ) -> VerifyResult<Signature> {
        let signer_pubkey = signer.pubkey();
        let mut transaction = template.into_transaction();

        let message_bytes = transaction.message.serialize();
        let signature = signer
            .try_sign_message(&message_bytes)
            .map_err(|e| VerifyError::config(format!("signing failed: {e}")))?;

        let num_required = transaction.message.header().num_required_signatures as usize;
        let position = transaction.message.static_account_keys()[..num_required]
            .iter()
            .position(|k| *k == signer_pubkey)
            .ok_or_else(|| {
                VerifyError::config(format!(
                    "signer {signer_pubkey} is not among the template's required signers"
                ))
            })?;
        if transaction.signatures.len() < num_required {
            transaction
                .signatures
                .resize(num_required, Signature::default());
        }
        transaction.signatures[position] = signature;

        let undersigned = transaction
            .signatures
            .iter()
            .any(|s| *s == Signature::default());
        if undersigned {
            warn!(signer = %signer_pubkey, "template still missing signatures");
            return Err(VerifyError::config(
                "template requires signatures this broadcaster does not hold",
            ));
        }

        // Clone the Arc out of the map entry before awaiting, so the shard
        // lock is not held across the submission.
        let lock = self
            .locks
            .entry(signer_pubkey)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _slot = lock.lock().await;

        let sent = self
            .retry
            .execute(|| async { self.rpc.send_transaction(&transaction).await })
            .await
            .map_err(VerifyError::from)?;
        debug!(signature = %sent, signer = %signer_pubkey, "broadcast complete");
        Ok(sent)
    }
}
