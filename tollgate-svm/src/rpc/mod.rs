//! The ledger RPC boundary.
//!
//! [`LedgerRpc`] is the single seam between this engine and the network.
//! Implementations return the engine-owned record types defined here and
//! classify every raw client error into a structured
//! [`RpcErrorKind`](tollgate::RpcErrorKind) before it crosses the boundary;
//! nothing downstream ever sees a raw RPC error or inspects error text.

pub mod adapter;

pub use adapter::SolanaLedgerRpc;

use async_trait::async_trait;
use solana_message::Hash;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use tollgate::error::{Retryable, RpcErrorKind, VerifyError, VerifyErrorKind};

use crate::chain::{Address, Commitment};

/// A classified RPC failure: structured kind plus human-readable context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {context}")]
pub struct RpcFailure {
    /// Structured classification deciding retryability.
    pub kind: RpcErrorKind,
    /// What the adapter was doing when the call failed.
    pub context: String,
}

impl RpcFailure {
    /// Creates a failure from a kind and context message.
    pub fn new(kind: RpcErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

impl Retryable for RpcFailure {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<RpcFailure> for VerifyError {
    fn from(failure: RpcFailure) -> Self {
        Self::new(VerifyErrorKind::Rpc(failure.kind))
    }
}

/// One entry of an address's signature history.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    /// Transaction signature.
    pub signature: Signature,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Block time, when the node knows it.
    pub block_time: Option<i64>,
    /// Execution error recorded by the ledger, if the transaction failed.
    pub err: Option<String>,
    /// Commitment the node reports for this signature; absent on nodes
    /// that predate the field (such entries are final).
    pub commitment: Option<Commitment>,
}

/// Current status of a single signature.
#[derive(Debug, Clone)]
pub struct SignatureStatus {
    /// Slot the transaction was processed in.
    pub slot: u64,
    /// Execution error recorded by the ledger, if any.
    pub err: Option<String>,
    /// Commitment the node reports; `None` while the signature is only
    /// known from gossip.
    pub commitment: Option<Commitment>,
}

/// A token balance attached to a transaction, before or after execution.
///
/// Matched downstream by `owner` + `mint`, never by raw account index.
#[derive(Debug, Clone)]
pub struct TokenBalance {
    /// Index of the token account in the transaction's account keys.
    pub account_index: usize,
    /// Token mint.
    pub mint: Address,
    /// Owner of the token account. Nullable in legacy ledger responses.
    pub owner: Option<Address>,
    /// Balance in the mint's base units.
    pub amount: u64,
}

/// A transaction as recorded by the ledger, read-only to this engine.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Transaction signature.
    pub signature: Signature,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Block time, when the node knows it.
    pub block_time: Option<i64>,
    /// Execution error recorded by the ledger, if the transaction failed.
    pub err: Option<String>,
    /// Fee paid, in lamports.
    pub fee: u64,
    /// Every account the transaction references, static keys first, then
    /// any addresses loaded from lookup tables (writable before readonly).
    pub account_keys: Vec<Address>,
    /// Lamport balances per account before execution.
    pub pre_balances: Vec<u64>,
    /// Lamport balances per account after execution.
    pub post_balances: Vec<u64>,
    /// Token balances before execution.
    pub pre_token_balances: Vec<TokenBalance>,
    /// Token balances after execution.
    pub post_token_balances: Vec<TokenBalance>,
}

impl TransactionRecord {
    /// Returns `true` if `address` appears among the referenced accounts.
    #[must_use]
    pub fn references(&self, address: &Address) -> bool {
        self.account_keys.contains(address)
    }
}

/// Mint metadata needed to build and validate token transfers.
#[derive(Debug, Clone, Copy)]
pub struct MintInfo {
    /// Decimal places of the mint.
    pub decimals: u8,
    /// Owning token program (SPL Token or Token-2022).
    pub token_program: solana_pubkey::Pubkey,
}

/// Read and submit operations against the ledger.
///
/// All reads are idempotent and safe to issue concurrently; only
/// [`send_transaction`](Self::send_transaction) has side effects, and
/// callers sharing a fee payer must serialize it (see the broadcaster).
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Lists recent signatures referencing `address`, newest first.
    async fn signatures_for_address(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, RpcFailure>;

    /// Fetches the current status of a signature, or `None` if unknown.
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcFailure>;

    /// Fetches a landed transaction with its balance metadata, or `None`
    /// if the node does not have it at the configured commitment.
    async fn transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionRecord>, RpcFailure>;

    /// Returns `true` if an account exists at `address`.
    async fn account_exists(&self, address: &Address) -> Result<bool, RpcFailure>;

    /// Lamport balance of an account (0 if it does not exist).
    async fn native_balance(&self, address: &Address) -> Result<u64, RpcFailure>;

    /// Base-unit balance of a token account.
    async fn token_account_balance(&self, token_account: &Address) -> Result<u64, RpcFailure>;

    /// Decimals and owning program of a mint.
    async fn mint_info(&self, mint: &Address) -> Result<MintInfo, RpcFailure>;

    /// A recent blockhash to bind transaction templates to.
    async fn latest_blockhash(&self) -> Result<Hash, RpcFailure>;

    /// Submits a signed transaction and returns its signature.
    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcFailure>;
}
