//! Error taxonomy for payment verification and settlement.
//!
//! Every raw RPC or SDK error is classified exactly once, at the ledger
//! boundary, into [`RpcErrorKind`]; the rest of the system only ever matches
//! on the structured kinds defined here. Each surfaced [`VerifyError`]
//! carries the payment reference, the expectation summary, and the
//! transaction signature when known, so a caller can decide between refund
//! and re-prompt without querying the ledger again.

use std::fmt;

/// Result type alias for verification operations.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Classification of an error as transient or permanent.
///
/// Implemented by every error type that flows through
/// [`RetryPolicy`](crate::retry::RetryPolicy). Transient errors are retried
/// with backoff; permanent errors surface immediately.
pub trait Retryable {
    /// Returns `true` if retrying the failed operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Structured kind of a ledger RPC failure.
///
/// Produced by the RPC adapter from the raw client error. Downstream code
/// must never inspect raw error text to decide retryability; the partition
/// lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RpcErrorKind {
    /// Endpoint is rate limiting requests (HTTP 429 or equivalent).
    #[error("rate limited by RPC endpoint")]
    RateLimited,
    /// Endpoint returned a server error (5xx or equivalent).
    #[error("RPC endpoint unavailable")]
    Unavailable,
    /// Transport-level failure (connect, reset, DNS).
    #[error("network error reaching RPC endpoint")]
    Network,
    /// The request did not complete in time.
    #[error("RPC request timed out")]
    Timeout,
    /// The node is behind the cluster and cannot serve the request yet.
    #[error("RPC node is behind")]
    NodeBehind,
    /// The request itself was rejected as malformed.
    #[error("RPC request rejected as invalid")]
    InvalidRequest,
    /// The signer lacks funds to pay for the submitted transaction.
    #[error("insufficient funds for transaction")]
    InsufficientFunds,
    /// Any other error the adapter could not classify further.
    #[error("unclassified RPC error")]
    Other,
}

impl Retryable for RpcErrorKind {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable | Self::Network | Self::Timeout | Self::NodeBehind
        )
    }
}

/// Why a confirmed transfer failed to match its expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// The payment reference is absent from the transaction's account keys.
    MissingReference,
    /// The expected recipient's balance of the expected asset did not change.
    WrongRecipient,
    /// The transaction moved a different asset than expected.
    WrongAsset,
    /// The recipient's balance delta differs from the expected amount.
    WrongAmount,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingReference => "reference not present in transaction",
            Self::WrongRecipient => "no balance change for expected recipient",
            Self::WrongAsset => "wrong asset transferred",
            Self::WrongAmount => "transferred amount differs from expectation",
        };
        f.write_str(s)
    }
}

/// Terminal and retryable failure kinds of a verification attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyErrorKind {
    /// No transaction for the reference has been observed yet.
    /// Retryable while the caller's deadline has not elapsed.
    #[error("no transaction found for reference yet")]
    NotFoundYet,

    /// A ledger/RPC failure; retryable with backoff when the kind is
    /// transient (rate limit, 5xx, transport, stale node).
    #[error("RPC failure: {0}")]
    Rpc(RpcErrorKind),

    /// The located transaction was executed and rejected by the ledger.
    /// Terminal: a failed on-chain transaction can never become valid.
    #[error("transaction failed on chain: {0}")]
    OnChainExecutionFailure(String),

    /// The transaction confirmed but does not satisfy the expectation.
    /// Terminal; treated as a misdirected-payment or fraud signal.
    #[error("{reason}: expected {expected}, actual {actual}")]
    ValidationMismatch {
        /// Which check failed.
        reason: MismatchReason,
        /// Amount the expectation demanded, in atomic units.
        expected: u64,
        /// Amount actually received by the recipient, in atomic units.
        actual: u64,
    },

    /// The deadline elapsed with no payment attempt observed.
    /// The caller may start a fresh wait on the same reference.
    #[error("deadline elapsed before a payment was observed")]
    Timeout,

    /// Malformed address, asset, or amount; fails before any network call.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// A verification failure with enough context to drive a refund decision.
///
/// Built with setter-style methods as context becomes known while the
/// attempt moves through locating, confirmation, and validation.
#[derive(Debug, Clone)]
pub struct VerifyError {
    /// What went wrong.
    pub kind: VerifyErrorKind,
    /// Base58 payment reference the attempt was tracking.
    pub reference: Option<String>,
    /// Transaction signature, when one was located.
    pub signature: Option<String>,
}

impl VerifyError {
    /// Creates an error from a kind with no context attached yet.
    #[must_use]
    pub const fn new(kind: VerifyErrorKind) -> Self {
        Self {
            kind,
            reference: None,
            signature: None,
        }
    }

    /// Attaches the payment reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attaches the located transaction signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(VerifyErrorKind::ConfigurationError(msg.into()))
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.reference, &self.signature) {
            (Some(reference), Some(signature)) => {
                write!(f, " (reference {reference}, signature {signature})")
            }
            (Some(reference), None) => write!(f, " (reference {reference})"),
            (None, Some(signature)) => write!(f, " (signature {signature})"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<VerifyErrorKind> for VerifyError {
    fn from(kind: VerifyErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<RpcErrorKind> for VerifyError {
    fn from(kind: RpcErrorKind) -> Self {
        Self::new(VerifyErrorKind::Rpc(kind))
    }
}

impl Retryable for VerifyError {
    fn is_retryable(&self) -> bool {
        match &self.kind {
            VerifyErrorKind::NotFoundYet => true,
            VerifyErrorKind::Rpc(kind) => kind.is_retryable(),
            VerifyErrorKind::OnChainExecutionFailure(_)
            | VerifyErrorKind::ValidationMismatch { .. }
            | VerifyErrorKind::Timeout
            | VerifyErrorKind::ConfigurationError(_) => false,
        }
    }
}
