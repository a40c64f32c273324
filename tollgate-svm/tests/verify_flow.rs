//! End-to-end verification flows over an in-process ledger mock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use solana_message::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use std::sync::Arc;
use tollgate::error::{MismatchReason, RpcErrorKind, VerifyErrorKind};
use tollgate::{RetryPolicy, Tier};
use tollgate_svm::rpc::{
    LedgerRpc, MintInfo, RpcFailure, SignatureRecord, SignatureStatus, TokenBalance,
    TransactionRecord,
};
use tollgate_svm::{
    Address, AssetKind, Commitment, PaymentVerifier, ReferenceTracker, TierLookup,
    TransactionBuilder, TransferExpectation,
};

fn addr(byte: u8) -> Address {
    Address::new(Pubkey::new_from_array([byte; 32]))
}

fn sig(byte: u8) -> Signature {
    Signature::from([byte; 64])
}

/// Scripted ledger: signature history, statuses, transactions, accounts.
#[derive(Default)]
struct MockLedger {
    history: Mutex<Vec<SignatureRecord>>,
    statuses: Mutex<HashMap<Signature, SignatureStatus>>,
    transactions: Mutex<HashMap<Signature, TransactionRecord>>,
    accounts: Mutex<Vec<Address>>,
    mints: Mutex<HashMap<Address, MintInfo>>,
    token_balances: Mutex<HashMap<Address, u64>>,
    history_calls: AtomicU32,
    /// Fail this many leading history calls with a 502-style error.
    history_failures: AtomicU32,
}

impl MockLedger {
    fn with_confirmed_transfer(
        reference: &Address,
        recipient: Address,
        mint: Address,
        amount: u64,
        signature: Signature,
    ) -> Self {
        let ledger = Self::default();
        ledger.history.lock().unwrap().push(SignatureRecord {
            signature,
            slot: 1_000,
            block_time: Some(1_700_000_000),
            err: None,
            commitment: Some(Commitment::Confirmed),
        });
        ledger.statuses.lock().unwrap().insert(
            signature,
            SignatureStatus {
                slot: 1_000,
                err: None,
                commitment: Some(Commitment::Confirmed),
            },
        );
        ledger.transactions.lock().unwrap().insert(
            signature,
            TransactionRecord {
                signature,
                slot: 1_000,
                block_time: Some(1_700_000_000),
                err: None,
                fee: 5_000,
                account_keys: vec![addr(1), recipient, mint, *reference],
                pre_balances: vec![10_000_000, 2_039_280, 1_000_000, 0],
                post_balances: vec![9_995_000, 2_039_280, 1_000_000, 0],
                pre_token_balances: vec![TokenBalance {
                    account_index: 1,
                    mint,
                    owner: Some(recipient),
                    amount: 0,
                }],
                post_token_balances: vec![TokenBalance {
                    account_index: 1,
                    mint,
                    owner: Some(recipient),
                    amount,
                }],
            },
        );
        ledger
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn signatures_for_address(
        &self,
        _address: &Address,
        _limit: usize,
    ) -> Result<Vec<SignatureRecord>, RpcFailure> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.history_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.history_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RpcFailure::new(
                RpcErrorKind::Unavailable,
                "HTTP 502 Bad Gateway",
            ));
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcFailure> {
        Ok(self.statuses.lock().unwrap().get(signature).cloned())
    }

    async fn transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionRecord>, RpcFailure> {
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }

    async fn account_exists(&self, address: &Address) -> Result<bool, RpcFailure> {
        Ok(self.accounts.lock().unwrap().contains(address))
    }

    async fn native_balance(&self, _address: &Address) -> Result<u64, RpcFailure> {
        Ok(0)
    }

    async fn token_account_balance(&self, token_account: &Address) -> Result<u64, RpcFailure> {
        Ok(self
            .token_balances
            .lock()
            .unwrap()
            .get(token_account)
            .copied()
            .unwrap_or(0))
    }

    async fn mint_info(&self, mint: &Address) -> Result<MintInfo, RpcFailure> {
        self.mints
            .lock()
            .unwrap()
            .get(mint)
            .copied()
            .ok_or_else(|| RpcFailure::new(RpcErrorKind::InvalidRequest, "mint not found"))
    }

    async fn latest_blockhash(&self) -> Result<Hash, RpcFailure> {
        Ok(Hash::default())
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcFailure> {
        Ok(*transaction
            .signatures
            .first()
            .unwrap_or(&Signature::default()))
    }
}

fn verifier_over(ledger: Arc<MockLedger>) -> PaymentVerifier {
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    PaymentVerifier::new(ledger, retry, Commitment::Confirmed, Duration::from_secs(1))
}

fn usdc_expectation(recipient: Address, mint: Address, amount: u64) -> TransferExpectation {
    TransferExpectation {
        recipient,
        amount,
        asset: AssetKind::Token(mint),
        reference: ReferenceTracker::new().create(),
    }
}

// No matching transaction within the deadline at 1s polling: timeout.
#[tokio::test(start_paused = true)]
async fn no_payment_within_deadline_times_out() {
    let ledger = Arc::new(MockLedger::default());
    let verifier = verifier_over(Arc::clone(&ledger));
    let expectation = usdc_expectation(addr(10), addr(20), 50_000);

    let err = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err.kind, VerifyErrorKind::Timeout));
    assert_eq!(err.reference, Some(expectation.reference.to_string()));
    // Polled roughly once per second for five seconds.
    let calls = ledger.history_calls.load(Ordering::SeqCst);
    assert!((5..=7).contains(&calls), "unexpected poll count {calls}");
}

// A confirmed transaction referencing R with the exact amount verifies.
#[tokio::test(start_paused = true)]
async fn exact_confirmed_transfer_verifies() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        expectation.reference.address(),
        recipient,
        mint,
        50_000,
        sig(7),
    ));
    let verifier = verifier_over(Arc::clone(&ledger));

    let result = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.signature, sig(7));
    assert_eq!(result.validated_amount, 50_000);
}

// A transfer of 40_000 against an expectation of 50_000 is a mismatch
// carrying both amounts.
#[tokio::test(start_paused = true)]
async fn short_transfer_is_a_validation_mismatch() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        expectation.reference.address(),
        recipient,
        mint,
        40_000,
        sig(8),
    ));
    let verifier = verifier_over(Arc::clone(&ledger));

    let err = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        VerifyErrorKind::ValidationMismatch {
            reason: MismatchReason::WrongAmount,
            expected: 50_000,
            actual: 40_000,
        }
    ));
    assert_eq!(err.signature, Some(sig(8).to_string()));
}

// A matching transaction that does not carry the reference never verifies.
#[tokio::test(start_paused = true)]
async fn transfer_without_reference_never_verifies() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    // The ledger transaction references some other key.
    let other = addr(99);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        &other, recipient, mint, 50_000, sig(9),
    ));
    // But the reference's own history still surfaces the signature (e.g. a
    // malicious caller replaying an unrelated payment's signature).
    {
        let tx = ledger
            .transactions
            .lock()
            .unwrap()
            .get(&sig(9))
            .cloned()
            .unwrap();
        assert!(!tx.account_keys.contains(expectation.reference.address()));
    }
    let verifier = verifier_over(Arc::clone(&ledger));

    let err = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        VerifyErrorKind::ValidationMismatch {
            reason: MismatchReason::MissingReference,
            ..
        }
    ));
}

// An execution error recorded by the ledger is terminal and never yields a
// result.
#[tokio::test(start_paused = true)]
async fn failed_on_chain_execution_is_terminal() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        expectation.reference.address(),
        recipient,
        mint,
        50_000,
        sig(11),
    ));
    ledger
        .statuses
        .lock()
        .unwrap()
        .get_mut(&sig(11))
        .unwrap()
        .err = Some("InstructionError(2, Custom(1))".to_owned());
    let verifier = verifier_over(Arc::clone(&ledger));

    let err = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        VerifyErrorKind::OnChainExecutionFailure(_)
    ));
    assert_eq!(err.signature, Some(sig(11).to_string()));
}

// Verifying the same reference twice returns the identical result without
// re-querying the ledger.
#[tokio::test(start_paused = true)]
async fn reverification_is_idempotent() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        expectation.reference.address(),
        recipient,
        mint,
        50_000,
        sig(12),
    ));
    let verifier = verifier_over(Arc::clone(&ledger));

    let first = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap();
    let polls_after_first = ledger.history_calls.load(Ordering::SeqCst);

    let second = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        ledger.history_calls.load(Ordering::SeqCst),
        polls_after_first,
        "cached re-verification must not hit the ledger"
    );
}

// One 502 then success: the call succeeds after exactly one retry with a
// positive backoff delay in between.
#[tokio::test(start_paused = true)]
async fn transient_rpc_failure_retries_once_with_backoff() {
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);
    let ledger = Arc::new(MockLedger::with_confirmed_transfer(
        expectation.reference.address(),
        recipient,
        mint,
        50_000,
        sig(13),
    ));
    ledger.history_failures.store(1, Ordering::SeqCst);
    let verifier = verifier_over(Arc::clone(&ledger));

    let started = tokio::time::Instant::now();
    let result = verifier
        .verify(&expectation, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.validated_amount, 50_000);
    assert_eq!(ledger.history_calls.load(Ordering::SeqCst), 2);
    // The retry policy's base delay is 100ms with ±25% jitter.
    assert!(started.elapsed() >= Duration::from_millis(75));
}

// The standard payment template has exactly three instructions in fixed
// order with a fee payer distinct from the sender.
#[tokio::test(start_paused = true)]
async fn payment_template_has_exact_structure() {
    let sender = addr(30);
    let fee_payer = addr(31);
    let recipient = addr(10);
    let mint = addr(20);
    let expectation = usdc_expectation(recipient, mint, 50_000);

    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    {
        let mut accounts = ledger.accounts.lock().unwrap();
        accounts.push(tollgate_svm::build::derive_token_account(
            &sender,
            &spl_token::id(),
            &mint,
        ));
        accounts.push(tollgate_svm::build::derive_token_account(
            &recipient,
            &spl_token::id(),
            &mint,
        ));
    }
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let builder = TransactionBuilder::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry);

    let template = builder
        .payment_template(&sender, &fee_payer, &expectation)
        .await
        .unwrap();

    assert_eq!(template.instruction_count(), 3);
    assert_eq!(template.fee_payer(), &fee_payer);
    assert_ne!(template.fee_payer(), &sender);

    let message = &template.transaction().message;
    let keys = message.static_account_keys();
    let instructions = message.instructions();
    let program_of =
        |index: usize| keys[instructions[index].program_id_index as usize];

    // [set-compute-limit, set-compute-price, transfer], by program and
    // discriminator.
    assert_eq!(program_of(0), solana_compute_budget_interface::ID);
    assert_eq!(instructions[0].data.first(), Some(&2));
    assert_eq!(program_of(1), solana_compute_budget_interface::ID);
    assert_eq!(instructions[1].data.first(), Some(&3));
    assert_eq!(program_of(2), spl_token::id());

    // The reference rides on the transfer instruction's accounts.
    let transfer_keys: Vec<Pubkey> = instructions[2]
        .accounts
        .iter()
        .map(|i| keys[*i as usize])
        .collect();
    assert!(transfer_keys.contains(expectation.reference.pubkey()));

    // Fee payer is first account key and signs; unsigned until the wallet
    // signs externally.
    assert_eq!(keys[0], *fee_payer.pubkey());
    assert!(template.transaction().signatures.is_empty());
}

// A payment template against a missing recipient token account fails
// before any template is produced.
#[tokio::test(start_paused = true)]
async fn payment_template_fails_fast_on_missing_account() {
    let sender = addr(30);
    let fee_payer = addr(31);
    let mint = addr(20);
    let expectation = usdc_expectation(addr(10), mint, 50_000);

    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    // Only the sender's account exists.
    ledger.accounts.lock().unwrap().push(
        tollgate_svm::build::derive_token_account(&sender, &spl_token::id(), &mint),
    );
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let builder = TransactionBuilder::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry);

    let err = builder
        .payment_template(&sender, &fee_payer, &expectation)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, VerifyErrorKind::ConfigurationError(_)));
}

// Reward templates create the counterparty's token account idempotently
// and carry the enlarged compute budget.
#[tokio::test(start_paused = true)]
async fn reward_template_provisions_account_creation() {
    let service = addr(40);
    let counterparty = addr(41);
    let mint = addr(20);

    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    ledger.accounts.lock().unwrap().push(
        tollgate_svm::build::derive_token_account(&service, &spl_token::id(), &mint),
    );
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let builder = TransactionBuilder::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry);

    let template = builder
        .reward_template(&service, &counterparty, &mint, 10_000, Some("job #42"))
        .await
        .unwrap();

    // [limit, price, create-ata, transfer, memo]
    assert_eq!(template.instruction_count(), 5);
    assert_eq!(template.fee_payer(), &service);

    let message = &template.transaction().message;
    let keys = message.static_account_keys();
    let instructions = message.instructions();
    assert_eq!(
        keys[instructions[2].program_id_index as usize],
        tollgate_svm::build::ATA_PROGRAM_ID
    );
    assert_eq!(instructions[2].data, vec![1]);
    assert_eq!(
        keys[instructions[4].program_id_index as usize],
        tollgate_svm::build::MEMO_PROGRAM_ID
    );
    assert_eq!(instructions[4].data, b"job #42".to_vec());
}

// Live balances drive tier and discount quotes.
#[tokio::test(start_paused = true)]
async fn holder_balance_drives_discount_quote() {
    let holder = addr(50);
    let mint = addr(20);
    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    let ata = tollgate_svm::build::derive_token_account(&holder, &spl_token::id(), &mint);
    ledger.accounts.lock().unwrap().push(ata);
    // 15,000 whole tokens at 6 decimals.
    ledger
        .token_balances
        .lock()
        .unwrap()
        .insert(ata, 15_000_000_000);

    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let tiers = TierLookup::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry, mint);

    let info = tiers.holder_tier(&holder).await.unwrap();
    assert_eq!(info.balance, 15_000);
    assert_eq!(info.tier, Tier::Silver);

    // 0.05 base price at 6 decimals: 20% off.
    let quote = tiers.quote(&holder, 50_000).await.unwrap();
    assert_eq!(quote.discount_percent, 20);
    assert_eq!(quote.final_price, 40_000);
    assert_eq!(quote.savings, 10_000);
    assert_eq!(quote.final_price + quote.savings, quote.base_price);
}

// Reward broadcasts sign with the service keypair and submit through the
// per-signer queue.
#[tokio::test(start_paused = true)]
async fn reward_broadcast_signs_and_submits() {
    use solana_keypair::Keypair;
    use solana_signer::Signer;
    use tollgate_svm::TemplateBroadcaster;

    let service_keypair = Keypair::new();
    let service = Address::new(service_keypair.pubkey());
    let counterparty = addr(41);
    let mint = addr(20);

    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    ledger.accounts.lock().unwrap().push(
        tollgate_svm::build::derive_token_account(&service, &spl_token::id(), &mint),
    );
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let builder = TransactionBuilder::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry);
    let broadcaster = TemplateBroadcaster::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry);

    let template = builder
        .reward_template(&service, &counterparty, &mint, 10_000, None)
        .await
        .unwrap();
    let sent = broadcaster
        .sign_and_send(template, &service_keypair)
        .await
        .unwrap();
    assert_ne!(sent, Signature::default());

    // A keypair that is not a required signer is rejected before any
    // submission.
    let template = builder
        .reward_template(&service, &counterparty, &mint, 10_000, None)
        .await
        .unwrap();
    let stranger = Keypair::new();
    let err = broadcaster
        .sign_and_send(template, &stranger)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, VerifyErrorKind::ConfigurationError(_)));
}

// A holder with no token account sits below every threshold.
#[tokio::test(start_paused = true)]
async fn holder_without_account_gets_no_discount() {
    let holder = addr(51);
    let mint = addr(20);
    let ledger = Arc::new(MockLedger::default());
    ledger.mints.lock().unwrap().insert(
        mint,
        MintInfo {
            decimals: 6,
            token_program: spl_token::id(),
        },
    );
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
    let tiers = TierLookup::new(Arc::clone(&ledger) as Arc<dyn LedgerRpc>, retry, mint);

    let info = tiers.holder_tier(&holder).await.unwrap();
    assert_eq!(info.tier, Tier::None);

    let quote = tiers.quote(&holder, 50_000).await.unwrap();
    assert_eq!(quote.discount_percent, 0);
    assert_eq!(quote.final_price, 50_000);
}
