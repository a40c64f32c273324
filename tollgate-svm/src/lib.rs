#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana payment verification and settlement engine for tollgate.
//!
//! This crate confirms that on-chain transfers satisfying a precise
//! expectation (recipient, amount, asset, correlation reference) actually
//! landed on a Solana-family ledger, builds the unsigned transaction
//! templates for payment, reward, and refund flows, and reads holder
//! balances for tier-based discounting. It reconciles an asynchronous,
//! eventually-consistent ledger against the marketplace's need for an
//! exactly-once, fraud-resistant settlement decision.
//!
//! # Architecture
//!
//! - [`chain`] / [`networks`] - Addresses, commitment levels, known networks
//! - [`rpc`] - The single RPC boundary: typed records, classified errors
//! - [`reference`] - Single-use payment correlation keys
//! - [`locate`] / [`confirm`] - Finding a payment and waiting for finality
//! - [`validate`] - Balance-delta validation against an expectation
//! - [`verify`] - The orchestrator, with an idempotent result cache
//! - [`build`] - Unsigned payment/reward/refund templates
//! - [`broadcast`] - Per-signer serialized submission of service transfers
//! - [`holdings`] - On-chain balance reads feeding the tier engine
//! - [`config`] / [`context`] - Startup configuration and the explicit
//!   engine context
//!
//! # Verification flow
//!
//! A caller creates a [`reference::PaymentReference`] and a
//! [`types::TransferExpectation`], hands the counterparty a template from
//! [`build::TransactionBuilder`], and awaits
//! [`verify::PaymentVerifier::verify`]. The verifier locates the
//! transaction through the reference's signature history, waits for the
//! target commitment, validates balance deltas, and caches the immutable
//! [`types::VerificationResult`] per reference.
//!
//! # Feature Flags
//!
//! - `dev-bypass` - Development-only verification bypass. Deliberately
//!   impossible to compile into a release artifact.

// A bypassed verification is a direct payment-fraud vector, so the bypass
// is not merely disabled in production: release artifacts cannot be built
// with the feature at all.
#[cfg(all(feature = "dev-bypass", not(debug_assertions)))]
compile_error!("feature `dev-bypass` must not be enabled in release builds");

pub mod broadcast;
pub mod build;
pub mod chain;
pub mod config;
pub mod confirm;
pub mod context;
pub mod holdings;
pub mod locate;
pub mod reference;
pub mod rpc;
pub mod types;
pub mod validate;
pub mod verify;

mod networks;
pub use networks::*;

pub use broadcast::TemplateBroadcaster;
pub use build::{TemplateKind, TransactionBuilder, TransactionTemplate};
pub use chain::{Address, AssetKind, Commitment};
pub use config::EngineConfig;
pub use confirm::{ConfirmationWaiter, WaitState};
pub use context::EngineContext;
pub use holdings::TierLookup;
pub use locate::{LocateOutcome, PaymentLocator};
pub use reference::{PaymentReference, ReferenceTracker};
pub use rpc::{LedgerRpc, SolanaLedgerRpc};
pub use types::{TransferExpectation, VerificationResult};
pub use validate::TransferValidator;
pub use verify::PaymentVerifier;
