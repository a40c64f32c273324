#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the tollgate payment verification engine.
//!
//! Tollgate settles pay-per-call API usage against a Solana-family ledger.
//! This crate holds everything that is independent of the chain SDK: the
//! error taxonomy with its transient/permanent partition, the retry policy
//! driving every network-touching call, the holder-tier discount engine,
//! and atomic-amount plumbing. Chain-specific verification, transaction
//! building, and the RPC boundary live in `tollgate-svm`.
//!
//! # Modules
//!
//! - [`amount`] - Decimal string parsing into integer atomic units
//! - [`error`] - Error taxonomy and retryability classification
//! - [`retry`] - Exponential backoff with jitter
//! - [`tier`] - Holder tiers and discount quoting
//! - [`timestamp`] - Unix timestamps for verification results

pub mod amount;
pub mod error;
pub mod retry;
pub mod tier;
pub mod timestamp;

pub use error::{
    MismatchReason, Retryable, RpcErrorKind, VerifyError, VerifyErrorKind, VerifyResult,
};
pub use retry::RetryPolicy;
pub use tier::{DiscountQuote, Tier, TierInfo};
pub use timestamp::UnixTimestamp;
