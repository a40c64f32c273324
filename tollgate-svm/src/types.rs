//! Expectation and result types of the verification pipeline.

use serde::{Serialize, Serializer};
use solana_signature::Signature;
use tollgate::UnixTimestamp;
use tollgate::error::VerifyError;

use crate::chain::{Address, AssetKind};
use crate::reference::PaymentReference;

/// What an expected payment must look like on chain.
///
/// Amounts are always integers in the asset's smallest unit; there is no
/// floating point anywhere in a financial comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferExpectation {
    /// Who must receive the funds.
    pub recipient: Address,
    /// Expected amount in atomic units.
    pub amount: u64,
    /// Asset the amount is denominated in.
    pub asset: AssetKind,
    /// Correlation key the transaction must reference.
    pub reference: PaymentReference,
}

impl TransferExpectation {
    /// Rejects expectations that cannot be satisfied by any transaction,
    /// before any network call is made.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero amount or a reference that
    /// collides with the recipient.
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.amount == 0 {
            return Err(VerifyError::config("expected amount must be positive")
                .with_reference(self.reference.to_string()));
        }
        if self.reference.address() == &self.recipient {
            return Err(
                VerifyError::config("reference must be distinct from the recipient")
                    .with_reference(self.reference.to_string()),
            );
        }
        Ok(())
    }
}

/// Proof that an expected payment landed and matched.
///
/// Issued only after the transaction reached the configured commitment and
/// passed transfer validation. Immutable once issued; the verifier caches
/// it per reference so re-queries are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationResult {
    /// Signature of the matching transaction.
    pub signature: Signature,
    /// Amount actually received, in atomic units.
    pub validated_amount: u64,
    /// When the verdict was issued.
    pub timestamp: UnixTimestamp,
}

impl Serialize for VerificationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("VerificationResult", 3)?;
        s.serialize_field("signature", &self.signature.to_string())?;
        s.serialize_field("validatedAmount", &self.validated_amount)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.end()
    }
}
