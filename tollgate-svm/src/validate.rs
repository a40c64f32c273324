//! Validating a confirmed transaction against a transfer expectation.

use tollgate::error::{MismatchReason, VerifyError, VerifyErrorKind, VerifyResult};
use tracing::debug;

use crate::chain::{Address, AssetKind};
use crate::rpc::{TokenBalance, TransactionRecord};
use crate::types::TransferExpectation;

/// Lamports of slack allowed on native transfers, covering fee and rent
/// artifacts when the recipient participates in fee payment. Token
/// transfers get no such slack.
pub const NATIVE_FEE_TOLERANCE_LAMPORTS: u64 = 5_000;

/// Base units of slack allowed on token transfers (rounding only).
pub const TOKEN_TOLERANCE_BASE_UNITS: u64 = 1;

/// Checks that a landed transaction satisfies a [`TransferExpectation`].
#[derive(Debug, Clone, Copy)]
pub struct TransferValidator {
    native_tolerance: u64,
}

impl Default for TransferValidator {
    fn default() -> Self {
        Self {
            native_tolerance: NATIVE_FEE_TOLERANCE_LAMPORTS,
        }
    }
}

impl TransferValidator {
    /// Creates a validator with a custom native-asset tolerance.
    #[must_use]
    pub const fn with_native_tolerance(native_tolerance: u64) -> Self {
        Self { native_tolerance }
    }

    /// Validates `record` against `expectation`, returning the recipient's
    /// actual balance delta in atomic units on success.
    ///
    /// Order of checks:
    ///
    /// 1. The reference must appear among the transaction's account keys.
    ///    Absence is an immediate mismatch regardless of any balance
    ///    coincidence; this is what prevents one payment from settling a
    ///    different caller's expectation.
    /// 2. The recipient's balance delta of the expected asset is computed
    ///    from the ledger's pre/post balances. Token balances are matched
    ///    by owner + mint, never by account index.
    /// 3. The delta must equal the expected amount, within
    ///    [`NATIVE_FEE_TOLERANCE_LAMPORTS`] for native transfers and
    ///    [`TOKEN_TOLERANCE_BASE_UNITS`] for token transfers.
    ///
    /// # Errors
    ///
    /// Returns a validation mismatch carrying expected and actual amounts,
    /// or an on-chain failure if the record itself carries an execution
    /// error.
    pub fn validate(
        &self,
        record: &TransactionRecord,
        expectation: &TransferExpectation,
    ) -> VerifyResult<u64> {
        let attach = |e: VerifyError| {
            e.with_reference(expectation.reference.to_string())
                .with_signature(record.signature.to_string())
        };

        if let Some(error) = &record.err {
            return Err(attach(VerifyError::new(
                VerifyErrorKind::OnChainExecutionFailure(error.clone()),
            )));
        }

        if !record.references(expectation.reference.address()) {
            return Err(attach(mismatch(
                MismatchReason::MissingReference,
                expectation.amount,
                0,
            )));
        }

        let delta = match &expectation.asset {
            AssetKind::Native => self.native_delta(record, &expectation.recipient),
            AssetKind::Token(mint) => Self::token_delta(record, &expectation.recipient, mint),
        };

        let (actual, tolerance) = match delta {
            Ok(pair) => pair,
            Err(reason) => return Err(attach(mismatch(reason, expectation.amount, 0))),
        };

        if actual.abs_diff(expectation.amount) > tolerance {
            return Err(attach(mismatch(
                MismatchReason::WrongAmount,
                expectation.amount,
                actual,
            )));
        }

        debug!(
            signature = %record.signature,
            amount = actual,
            "transfer matches expectation"
        );
        Ok(actual)
    }

    fn native_delta(
        &self,
        record: &TransactionRecord,
        recipient: &Address,
    ) -> Result<(u64, u64), MismatchReason> {
        let index = record
            .account_keys
            .iter()
            .position(|k| k == recipient)
            .ok_or(MismatchReason::WrongRecipient)?;
        let pre = record
            .pre_balances
            .get(index)
            .copied()
            .ok_or(MismatchReason::WrongRecipient)?;
        let post = record
            .post_balances
            .get(index)
            .copied()
            .ok_or(MismatchReason::WrongRecipient)?;
        if post <= pre {
            return Err(MismatchReason::WrongRecipient);
        }
        Ok((post - pre, self.native_tolerance))
    }

    fn token_delta(
        record: &TransactionRecord,
        recipient: &Address,
        mint: &Address,
    ) -> Result<(u64, u64), MismatchReason> {
        let owned_by_recipient =
            |b: &&TokenBalance| b.owner.as_ref() == Some(recipient);

        let post = record
            .post_token_balances
            .iter()
            .filter(owned_by_recipient)
            .collect::<Vec<_>>();
        if post.is_empty() {
            return Err(MismatchReason::WrongRecipient);
        }

        // A freshly created token account has no pre entry; its pre balance
        // is zero by definition.
        let post_amount = post
            .iter()
            .find(|b| &b.mint == mint)
            .map(|b| b.amount)
            .ok_or(MismatchReason::WrongAsset)?;
        let pre_amount = record
            .pre_token_balances
            .iter()
            .filter(owned_by_recipient)
            .find(|b| &b.mint == mint)
            .map_or(0, |b| b.amount);

        if post_amount <= pre_amount {
            return Err(MismatchReason::WrongRecipient);
        }
        Ok((post_amount - pre_amount, TOKEN_TOLERANCE_BASE_UNITS))
    }
}

fn mismatch(reason: MismatchReason, expected: u64, actual: u64) -> VerifyError {
    VerifyError::new(VerifyErrorKind::ValidationMismatch {
        reason,
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceTracker;
    use solana_pubkey::Pubkey;
    use solana_signature::Signature;

    fn addr(byte: u8) -> Address {
        Address::new(Pubkey::new_from_array([byte; 32]))
    }

    fn token_record(
        reference: Option<&Address>,
        recipient: Address,
        mint: Address,
        pre: u64,
        post: u64,
    ) -> TransactionRecord {
        let mut account_keys = vec![addr(1), addr(2), mint, recipient];
        if let Some(reference) = reference {
            account_keys.push(*reference);
        }
        TransactionRecord {
            signature: Signature::from([9u8; 64]),
            slot: 5,
            block_time: Some(1_700_000_000),
            err: None,
            fee: 5_000,
            account_keys,
            pre_balances: vec![10_000_000, 2_039_280, 1_000_000, 2_039_280],
            post_balances: vec![9_995_000, 2_039_280, 1_000_000, 2_039_280],
            pre_token_balances: vec![TokenBalance {
                account_index: 1,
                mint,
                owner: Some(recipient),
                amount: pre,
            }],
            post_token_balances: vec![TokenBalance {
                account_index: 1,
                mint,
                owner: Some(recipient),
                amount: post,
            }],
        }
    }

    fn expectation(recipient: Address, mint: Address, amount: u64) -> TransferExpectation {
        TransferExpectation {
            recipient,
            amount,
            asset: AssetKind::Token(mint),
            reference: ReferenceTracker::new().create(),
        }
    }

    #[test]
    fn exact_token_transfer_validates() {
        let recipient = addr(40);
        let mint = addr(50);
        let exp = expectation(recipient, mint, 50_000);
        let record = token_record(Some(exp.reference.address()), recipient, mint, 100_000, 150_000);
        let validated = TransferValidator::default().validate(&record, &exp).unwrap();
        assert_eq!(validated, 50_000);
    }

    #[test]
    fn missing_reference_never_validates() {
        let recipient = addr(40);
        let mint = addr(50);
        let exp = expectation(recipient, mint, 50_000);
        // Amount and recipient match perfectly, reference absent.
        let record = token_record(None, recipient, mint, 100_000, 150_000);
        let err = TransferValidator::default()
            .validate(&record, &exp)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::ValidationMismatch {
                reason: MismatchReason::MissingReference,
                ..
            }
        ));
    }

    #[test]
    fn shortfall_reports_expected_and_actual() {
        let recipient = addr(40);
        let mint = addr(50);
        let exp = expectation(recipient, mint, 50_000);
        let record = token_record(Some(exp.reference.address()), recipient, mint, 0, 40_000);
        let err = TransferValidator::default()
            .validate(&record, &exp)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::ValidationMismatch {
                reason: MismatchReason::WrongAmount,
                expected: 50_000,
                actual: 40_000,
            }
        ));
        assert!(err.signature.is_some());
    }

    #[test]
    fn wrong_mint_is_an_asset_mismatch() {
        let recipient = addr(40);
        let exp = expectation(recipient, addr(50), 50_000);
        let record = token_record(Some(exp.reference.address()), recipient, addr(51), 0, 50_000);
        let err = TransferValidator::default()
            .validate(&record, &exp)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::ValidationMismatch {
                reason: MismatchReason::WrongAsset,
                ..
            }
        ));
    }

    #[test]
    fn one_base_unit_of_rounding_is_tolerated() {
        let recipient = addr(40);
        let mint = addr(50);
        let exp = expectation(recipient, mint, 50_000);
        let record = token_record(Some(exp.reference.address()), recipient, mint, 0, 49_999);
        assert!(TransferValidator::default().validate(&record, &exp).is_ok());

        let record = token_record(Some(exp.reference.address()), recipient, mint, 0, 49_998);
        assert!(TransferValidator::default().validate(&record, &exp).is_err());
    }

    #[test]
    fn execution_error_yields_on_chain_failure() {
        let recipient = addr(40);
        let mint = addr(50);
        let exp = expectation(recipient, mint, 50_000);
        let mut record = token_record(Some(exp.reference.address()), recipient, mint, 0, 50_000);
        record.err = Some("InstructionError(2, Custom(1))".to_owned());
        let err = TransferValidator::default()
            .validate(&record, &exp)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::OnChainExecutionFailure(_)
        ));
    }

    #[test]
    fn native_transfer_allows_fee_artifacts() {
        let recipient = addr(40);
        let reference = ReferenceTracker::new().create();
        let exp = TransferExpectation {
            recipient,
            amount: 1_000_000,
            asset: AssetKind::Native,
            reference,
        };
        let record = TransactionRecord {
            signature: Signature::from([9u8; 64]),
            slot: 5,
            block_time: None,
            err: None,
            fee: 5_000,
            account_keys: vec![addr(1), recipient, *reference.address()],
            pre_balances: vec![10_000_000, 500_000, 0],
            // Recipient received 1_000_000 minus a 2_000 lamport rent
            // artifact: within tolerance.
            post_balances: vec![8_995_000, 1_498_000, 0],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        };
        let validated = TransferValidator::default().validate(&record, &exp).unwrap();
        assert_eq!(validated, 998_000);
    }
}
