//! Unsigned transaction templates for payment, reward, and refund flows.
//!
//! Templates are built fresh per request against a just-fetched blockhash
//! and handed to an external signer. A downstream settlement facilitator
//! performs exact structural matching on the instruction set, which fixes
//! the payment shape to exactly `[set-compute-limit, set-compute-price,
//! transfer]` with a fee payer distinct from the sending wallet: a sender
//! that pays its own fees causes common wallet software to inject extra
//! protective instructions, and those break the facilitator's match.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_message::v0::Message as MessageV0;
use solana_message::{Hash, VersionedMessage};
use solana_pubkey::{Pubkey, pubkey};
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::instruction::AccountMeta;
use tollgate::error::{VerifyError, VerifyResult};
use tollgate::{RetryPolicy, UnixTimestamp};
use tracing::debug;

use crate::chain::{Address, AssetKind};
use crate::reference::PaymentReference;
use crate::rpc::{LedgerRpc, MintInfo};
use crate::types::TransferExpectation;

/// Associated Token Account program.
pub const ATA_PROGRAM_ID: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// SPL Memo program.
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// System program.
pub const SYSTEM_PROGRAM_ID: Pubkey = pubkey!("11111111111111111111111111111111");

/// Compute units for the fixed three-instruction payment shape.
pub const PAYMENT_COMPUTE_UNITS: u32 = 20_000;

/// Compute units for reward/refund templates. Sized for the worst case of
/// token-account creation plus transfer plus memo; under-provisioning makes
/// otherwise-valid transactions fail deep in execution.
pub const REWARD_COMPUTE_UNITS: u32 = 120_000;

/// Default compute unit price in micro-lamports.
pub const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 20_000;

/// Longest memo accepted on reward templates, in bytes.
pub const MAX_MEMO_BYTES: usize = 256;

/// Seconds a bound blockhash can be assumed valid (~150 slots).
pub const BLOCKHASH_VALIDITY_SECS: u64 = 60;

/// What a template is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Caller pays the service for an API call.
    Payment,
    /// Service pays a counterparty.
    Reward,
    /// Platform returns funds for a failed or rejected call.
    Refund,
}

/// An unsigned, ordered instruction sequence with a designated fee payer.
///
/// Owned by the caller until signed externally. Valid only while its bound
/// blockhash is; an expired template must be rebuilt, never reused.
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    kind: TemplateKind,
    transaction: VersionedTransaction,
    fee_payer: Address,
    blockhash: Hash,
    built_at: UnixTimestamp,
}

impl TransactionTemplate {
    /// What this template is for.
    #[must_use]
    pub const fn kind(&self) -> TemplateKind {
        self.kind
    }

    /// The identity that pays network fees.
    #[must_use]
    pub const fn fee_payer(&self) -> &Address {
        &self.fee_payer
    }

    /// Blockhash the template is bound to.
    #[must_use]
    pub const fn blockhash(&self) -> &Hash {
        &self.blockhash
    }

    /// When the template was built.
    #[must_use]
    pub const fn built_at(&self) -> UnixTimestamp {
        self.built_at
    }

    /// The unsigned transaction.
    #[must_use]
    pub const fn transaction(&self) -> &VersionedTransaction {
        &self.transaction
    }

    /// Consumes the template, yielding the unsigned transaction.
    #[must_use]
    pub fn into_transaction(self) -> VersionedTransaction {
        self.transaction
    }

    /// Number of instructions in the template.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.transaction.message.instructions().len()
    }

    /// Whether the bound blockhash has likely fallen out of the ledger's
    /// validity window. Expired templates must be rebuilt.
    #[must_use]
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        now.elapsed_since(self.built_at) > BLOCKHASH_VALIDITY_SECS
    }

    /// Serializes the unsigned transaction to base64 for an external signer.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if serialization fails.
    pub fn as_base64(&self) -> VerifyResult<String> {
        let bytes = bincode::serialize(&self.transaction)
            .map_err(|e| VerifyError::config(format!("transaction serialization failed: {e}")))?;
        Ok(b64.encode(bytes))
    }
}

/// Builds unsigned transfer, reward, and refund templates.
pub struct TransactionBuilder {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
    compute_unit_price: u64,
}

impl std::fmt::Debug for TransactionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field("compute_unit_price", &self.compute_unit_price)
            .finish_non_exhaustive()
    }
}

impl TransactionBuilder {
    /// Creates a builder with the default compute unit price.
    #[must_use]
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            retry,
            compute_unit_price: DEFAULT_COMPUTE_UNIT_PRICE,
        }
    }

    /// Overrides the compute unit price in micro-lamports.
    #[must_use]
    pub const fn with_compute_unit_price(mut self, micro_lamports: u64) -> Self {
        self.compute_unit_price = micro_lamports;
        self
    }

    /// Builds a payment template: the caller pays the service.
    ///
    /// Exactly three instructions, in order: set-compute-limit,
    /// set-compute-price, transfer. `fee_payer` must differ from `sender`.
    /// For token payments, both parties' token accounts must already exist;
    /// the builder fails here rather than producing a template that will
    /// fail on submission.
    ///
    /// # Errors
    ///
    /// Configuration errors for a bad expectation, identical sender and fee
    /// payer, or missing token accounts; RPC errors from mint and account
    /// lookups.
    pub async fn payment_template(
        &self,
        sender: &Address,
        fee_payer: &Address,
        expectation: &TransferExpectation,
    ) -> VerifyResult<TransactionTemplate> {
        expectation.validate()?;
        if sender == fee_payer {
            return Err(VerifyError::config(
                "fee payer must be distinct from the sending wallet",
            )
            .with_reference(expectation.reference.to_string()));
        }

        let transfer = match &expectation.asset {
            AssetKind::Native => {
                native_transfer(sender, &expectation.recipient, expectation.amount)
            }
            AssetKind::Token(mint) => {
                let mint_info = self.fetch_mint(mint).await?;
                let source = derive_token_account(sender, &mint_info.token_program, mint);
                let destination =
                    derive_token_account(&expectation.recipient, &mint_info.token_program, mint);
                self.require_account(&source, "sender token account").await?;
                self.require_account(&destination, "recipient token account")
                    .await?;
                token_transfer(
                    &mint_info,
                    &source,
                    mint,
                    &destination,
                    sender,
                    expectation.amount,
                )?
            }
        };
        let transfer = tag_reference(transfer, &expectation.reference);

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(PAYMENT_COMPUTE_UNITS),
            ComputeBudgetInstruction::set_compute_unit_price(self.compute_unit_price),
            transfer,
        ];
        self.compile(TemplateKind::Payment, fee_payer, instructions)
            .await
    }

    /// Builds a reward template: the service pays a counterparty.
    ///
    /// The service identity is both signer and fee payer. The recipient's
    /// token account is created idempotently when absent, and the compute
    /// budget covers creation plus transfer plus an optional memo.
    ///
    /// # Errors
    ///
    /// Configuration errors for a zero amount, an over-long memo, or a
    /// missing service token account; RPC errors from lookups.
    pub async fn reward_template(
        &self,
        service: &Address,
        recipient: &Address,
        mint: &Address,
        amount: u64,
        memo: Option<&str>,
    ) -> VerifyResult<TransactionTemplate> {
        self.service_transfer(TemplateKind::Reward, service, recipient, mint, amount, memo, None)
            .await
    }

    /// Builds a refund template: the platform returns a counterparty's
    /// payment. Structurally a reward drawn from the platform identity,
    /// tagged with the original payment reference for auditability.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`reward_template`](Self::reward_template).
    pub async fn refund_template(
        &self,
        platform: &Address,
        recipient: &Address,
        mint: &Address,
        amount: u64,
        reference: &PaymentReference,
    ) -> VerifyResult<TransactionTemplate> {
        self.service_transfer(
            TemplateKind::Refund,
            platform,
            recipient,
            mint,
            amount,
            None,
            Some(reference),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn service_transfer(
        &self,
        kind: TemplateKind,
        authority: &Address,
        recipient: &Address,
        mint: &Address,
        amount: u64,
        memo: Option<&str>,
        reference: Option<&PaymentReference>,
    ) -> VerifyResult<TransactionTemplate> {
        if amount == 0 {
            return Err(VerifyError::config("transfer amount must be positive"));
        }
        if let Some(memo) = memo {
            if memo.len() > MAX_MEMO_BYTES {
                return Err(VerifyError::config(format!(
                    "memo exceeds {MAX_MEMO_BYTES} bytes"
                )));
            }
        }

        let mint_info = self.fetch_mint(mint).await?;
        let source = derive_token_account(authority, &mint_info.token_program, mint);
        self.require_account(&source, "service token account").await?;
        let destination = derive_token_account(recipient, &mint_info.token_program, mint);

        let mut transfer =
            token_transfer(&mint_info, &source, mint, &destination, authority, amount)?;
        if let Some(reference) = reference {
            transfer = tag_reference(transfer, reference);
        }

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(REWARD_COMPUTE_UNITS),
            ComputeBudgetInstruction::set_compute_unit_price(self.compute_unit_price),
            create_token_account_idempotent(authority, &destination, recipient, mint, &mint_info),
            transfer,
        ];
        if let Some(memo) = memo {
            instructions.push(Instruction {
                program_id: MEMO_PROGRAM_ID,
                accounts: vec![],
                data: memo.as_bytes().to_vec(),
            });
        }

        self.compile(kind, authority, instructions).await
    }

    async fn fetch_mint(&self, mint: &Address) -> VerifyResult<MintInfo> {
        self.retry
            .execute(|| async { self.rpc.mint_info(mint).await })
            .await
            .map_err(VerifyError::from)
    }

    async fn require_account(&self, address: &Address, what: &str) -> VerifyResult<()> {
        let exists = self
            .retry
            .execute(|| async { self.rpc.account_exists(address).await })
            .await
            .map_err(VerifyError::from)?;
        if exists {
            Ok(())
        } else {
            Err(VerifyError::config(format!("{what} {address} does not exist")))
        }
    }

    async fn compile(
        &self,
        kind: TemplateKind,
        fee_payer: &Address,
        instructions: Vec<Instruction>,
    ) -> VerifyResult<TransactionTemplate> {
        let blockhash = self
            .retry
            .execute(|| async { self.rpc.latest_blockhash().await })
            .await
            .map_err(VerifyError::from)?;

        let message = MessageV0::try_compile(fee_payer.pubkey(), &instructions, &[], blockhash)
            .map_err(|e| VerifyError::config(format!("message compilation failed: {e:?}")))?;
        let transaction = VersionedTransaction {
            signatures: vec![],
            message: VersionedMessage::V0(message),
        };
        debug!(?kind, fee_payer = %fee_payer, instructions = instructions.len(), "built template");
        Ok(TransactionTemplate {
            kind,
            transaction,
            fee_payer: *fee_payer,
            blockhash,
            built_at: UnixTimestamp::now(),
        })
    }
}

/// Derives the associated token account of `owner` for `mint`.
#[must_use]
pub fn derive_token_account(owner: &Address, token_program: &Pubkey, mint: &Address) -> Address {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_ID,
    );
    Address::new(ata)
}

fn token_transfer(
    mint_info: &MintInfo,
    source: &Address,
    mint: &Address,
    destination: &Address,
    authority: &Address,
    amount: u64,
) -> VerifyResult<Instruction> {
    if mint_info.token_program == spl_token::id() {
        spl_token::instruction::transfer_checked(
            &mint_info.token_program,
            source.pubkey(),
            mint.pubkey(),
            destination.pubkey(),
            authority.pubkey(),
            &[],
            amount,
            mint_info.decimals,
        )
        .map_err(|e| VerifyError::config(format!("transfer instruction: {e}")))
    } else if mint_info.token_program == spl_token_2022::id() {
        spl_token_2022::instruction::transfer_checked(
            &mint_info.token_program,
            source.pubkey(),
            mint.pubkey(),
            destination.pubkey(),
            authority.pubkey(),
            &[],
            amount,
            mint_info.decimals,
        )
        .map_err(|e| VerifyError::config(format!("transfer instruction: {e}")))
    } else {
        Err(VerifyError::config(format!(
            "unsupported token program {}",
            mint_info.token_program
        )))
    }
}

/// System transfer, built at the byte level: 4-byte LE discriminator `2`
/// followed by the lamport amount.
fn native_transfer(from: &Address, to: &Address, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*from.pubkey(), true),
            AccountMeta::new(*to.pubkey(), false),
        ],
        data,
    }
}

/// Idempotent associated-token-account creation (discriminator `1`), a
/// no-op on chain when the account already exists.
fn create_token_account_idempotent(
    payer: &Address,
    token_account: &Address,
    owner: &Address,
    mint: &Address,
    mint_info: &MintInfo,
) -> Instruction {
    Instruction {
        program_id: ATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer.pubkey(), true),
            AccountMeta::new(*token_account.pubkey(), false),
            AccountMeta::new_readonly(*owner.pubkey(), false),
            AccountMeta::new_readonly(*mint.pubkey(), false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(mint_info.token_program, false),
        ],
        data: vec![1],
    }
}

/// Appends the reference as a read-only, non-signing account on the
/// transfer instruction so the transaction is discoverable through the
/// reference's signature history.
fn tag_reference(mut instruction: Instruction, reference: &PaymentReference) -> Instruction {
    instruction
        .accounts
        .push(AccountMeta::new_readonly(*reference.pubkey(), false));
    instruction
}
