//! Production [`LedgerRpc`] implementation over the Solana RPC client.
//!
//! Two concerns are deliberately concentrated here and nowhere else:
//!
//! 1. **Schema tolerance.** Several fields of legacy `getTransaction`
//!    responses are nullable (`blockTime`, `meta`, token-balance `owner`,
//!    `confirmationStatus`); strict SDK types reject them. The raw request
//!    path below deserializes into an `Option`-tolerant schema and
//!    normalizes before anything downstream sees the record.
//! 2. **Error classification.** Every raw [`ClientError`] is mapped to a
//!    structured [`RpcErrorKind`] here, from error structure only and
//!    never from message text.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_request::{RpcError, RpcRequest, RpcResponseErrorData};
use solana_client::rpc_response::{TransactionConfirmationStatus, TransactionError};
use solana_message::Hash;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_pack::Pack;
use tollgate::error::RpcErrorKind;

use super::{
    LedgerRpc, MintInfo, RpcFailure, SignatureRecord, SignatureStatus, TokenBalance,
    TransactionRecord,
};
use crate::chain::{Address, Commitment};

/// [`LedgerRpc`] backed by a nonblocking Solana [`RpcClient`].
pub struct SolanaLedgerRpc {
    client: RpcClient,
    commitment: Commitment,
}

impl std::fmt::Debug for SolanaLedgerRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedgerRpc")
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

impl SolanaLedgerRpc {
    /// Connects to `endpoint` with the given default commitment.
    #[must_use]
    pub fn new(endpoint: &str, commitment: Commitment) -> Self {
        let client = RpcClient::new_with_commitment(endpoint.to_owned(), commitment.to_config());
        Self { client, commitment }
    }

    /// History and transaction queries need at least `confirmed`;
    /// `processed` is not a valid search commitment.
    const fn search_commitment(&self) -> Commitment {
        match self.commitment {
            Commitment::Processed | Commitment::Confirmed => Commitment::Confirmed,
            Commitment::Finalized => Commitment::Finalized,
        }
    }

    fn failure(&self, err: &ClientError, context: &str) -> RpcFailure {
        RpcFailure::new(classify(err), format!("{context}: {err}"))
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedgerRpc {
    async fn signatures_for_address(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, RpcFailure> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.search_commitment().to_config()),
        };
        let entries = self
            .client
            .get_signatures_for_address_with_config(address.pubkey(), config)
            .await
            .map_err(|e| self.failure(&e, "get_signatures_for_address"))?;

        entries
            .into_iter()
            .map(|entry| {
                let signature = Signature::from_str(&entry.signature).map_err(|e| {
                    RpcFailure::new(
                        RpcErrorKind::Other,
                        format!("unparseable signature in history: {e}"),
                    )
                })?;
                Ok(SignatureRecord {
                    signature,
                    slot: entry.slot,
                    block_time: entry.block_time,
                    err: entry.err.map(|e| e.to_string()),
                    commitment: entry.confirmation_status.map(confirmation_to_commitment),
                })
            })
            .collect()
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcFailure> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.failure(&e, "get_signature_statuses"))?;
        let status = response.value.into_iter().next().flatten();
        Ok(status.map(|s| SignatureStatus {
            slot: s.slot,
            err: s.err.map(|e| e.to_string()),
            commitment: s.confirmation_status.map(confirmation_to_commitment),
        }))
    }

    async fn transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionRecord>, RpcFailure> {
        let params = json!([
            signature.to_string(),
            {
                "encoding": "json",
                "commitment": self.search_commitment().as_str(),
                "maxSupportedTransactionVersion": 0,
            }
        ]);
        let raw: Option<RawConfirmedTransaction> = self
            .client
            .send(RpcRequest::GetTransaction, params)
            .await
            .map_err(|e| self.failure(&e, "get_transaction"))?;
        raw.map(|r| r.into_record(*signature)).transpose()
    }

    async fn account_exists(&self, address: &Address) -> Result<bool, RpcFailure> {
        let accounts = self
            .client
            .get_multiple_accounts(&[*address.pubkey()])
            .await
            .map_err(|e| self.failure(&e, "get_multiple_accounts"))?;
        Ok(accounts.into_iter().next().flatten().is_some())
    }

    async fn native_balance(&self, address: &Address) -> Result<u64, RpcFailure> {
        self.client
            .get_balance(address.pubkey())
            .await
            .map_err(|e| self.failure(&e, "get_balance"))
    }

    async fn token_account_balance(&self, token_account: &Address) -> Result<u64, RpcFailure> {
        let params = json!([
            token_account.to_string(),
            { "commitment": self.commitment.as_str() }
        ]);
        let response: RawRpcResponse<RawTokenAmount> = self
            .client
            .send(RpcRequest::GetTokenAccountBalance, params)
            .await
            .map_err(|e| self.failure(&e, "get_token_account_balance"))?;
        parse_base_units(&response.value.amount)
    }

    async fn mint_info(&self, mint: &Address) -> Result<MintInfo, RpcFailure> {
        let account = self
            .client
            .get_multiple_accounts(&[*mint.pubkey()])
            .await
            .map_err(|e| self.failure(&e, "get_multiple_accounts"))?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| {
                RpcFailure::new(RpcErrorKind::InvalidRequest, format!("mint {mint} not found"))
            })?;

        let decimals = if account.owner == spl_token::id() {
            spl_token::state::Mint::unpack(&account.data)
                .map_err(|e| {
                    RpcFailure::new(RpcErrorKind::Other, format!("unpack mint {mint}: {e}"))
                })?
                .decimals
        } else if account.owner == spl_token_2022::id() {
            spl_token_2022::state::Mint::unpack(&account.data)
                .map_err(|e| {
                    RpcFailure::new(RpcErrorKind::Other, format!("unpack mint {mint}: {e}"))
                })?
                .decimals
        } else {
            return Err(RpcFailure::new(
                RpcErrorKind::InvalidRequest,
                format!("account {mint} is not a token mint"),
            ));
        };

        Ok(MintInfo {
            decimals,
            token_program: account.owner,
        })
    }

    async fn latest_blockhash(&self) -> Result<Hash, RpcFailure> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.failure(&e, "get_latest_blockhash"))
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcFailure> {
        self.client
            .send_transaction(transaction)
            .await
            .map_err(|e| self.failure(&e, "send_transaction"))
    }
}

const fn confirmation_to_commitment(status: TransactionConfirmationStatus) -> Commitment {
    match status {
        TransactionConfirmationStatus::Processed => Commitment::Processed,
        TransactionConfirmationStatus::Confirmed => Commitment::Confirmed,
        TransactionConfirmationStatus::Finalized => Commitment::Finalized,
    }
}

/// Classifies a raw client error into a structured kind, from the error's
/// structure only.
fn classify(err: &ClientError) -> RpcErrorKind {
    match &*err.kind {
        ClientErrorKind::Io(_) => RpcErrorKind::Network,
        ClientErrorKind::Reqwest(e) => {
            if e.is_timeout() {
                return RpcErrorKind::Timeout;
            }
            match e.status() {
                Some(status) if status.as_u16() == 429 => RpcErrorKind::RateLimited,
                Some(status) if status.is_server_error() => RpcErrorKind::Unavailable,
                _ => RpcErrorKind::Network,
            }
        }
        ClientErrorKind::RpcError(rpc_error) => classify_rpc_error(rpc_error),
        ClientErrorKind::TransactionError(tx_error) => classify_transaction_error(tx_error),
        _ => RpcErrorKind::Other,
    }
}

fn classify_rpc_error(err: &RpcError) -> RpcErrorKind {
    match err {
        RpcError::RpcRequestError(_) => RpcErrorKind::Network,
        RpcError::RpcResponseError { code, data, .. } => {
            if let RpcResponseErrorData::SendTransactionPreflightFailure(sim) = data {
                if let Some(tx_error) = &sim.err {
                    return classify_transaction_error(&tx_error.clone().into());
                }
            }
            match *code {
                // Node unhealthy / behind, or the requested block is not
                // yet available at this node.
                -32005 | -32004 | -32014 => RpcErrorKind::NodeBehind,
                // Malformed request or params.
                -32600 | -32601 | -32602 => RpcErrorKind::InvalidRequest,
                _ => RpcErrorKind::Other,
            }
        }
        RpcError::ParseError(_) | RpcError::ForUser(_) => RpcErrorKind::Other,
    }
}

fn classify_transaction_error(err: &TransactionError) -> RpcErrorKind {
    match err {
        TransactionError::InsufficientFundsForFee
        | TransactionError::InsufficientFundsForRent { .. } => RpcErrorKind::InsufficientFunds,
        _ => RpcErrorKind::Other,
    }
}

fn parse_base_units(amount: &str) -> Result<u64, RpcFailure> {
    amount.parse::<u64>().map_err(|e| {
        RpcFailure::new(
            RpcErrorKind::Other,
            format!("unparseable token amount {amount:?}: {e}"),
        )
    })
}

fn parse_address(s: &str, what: &str) -> Result<Address, RpcFailure> {
    s.parse().map_err(|_| {
        RpcFailure::new(
            RpcErrorKind::Other,
            format!("unparseable {what} in transaction record: {s}"),
        )
    })
}

/// The `{context, value}` envelope most read methods return.
#[derive(Debug, Deserialize)]
struct RawRpcResponse<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenAmount {
    amount: String,
}

/// Nullable-tolerant `getTransaction` response schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfirmedTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    transaction: RawEncodedTransaction,
    #[serde(default)]
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
struct RawEncodedTransaction {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    account_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    err: Option<serde_json::Value>,
    fee: u64,
    pre_balances: Vec<u64>,
    post_balances: Vec<u64>,
    #[serde(default)]
    pre_token_balances: Option<Vec<RawTokenBalance>>,
    #[serde(default)]
    post_token_balances: Option<Vec<RawTokenBalance>>,
    #[serde(default)]
    loaded_addresses: Option<RawLoadedAddresses>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenBalance {
    account_index: usize,
    mint: String,
    #[serde(default)]
    owner: Option<String>,
    ui_token_amount: RawTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

impl RawConfirmedTransaction {
    fn into_record(self, signature: Signature) -> Result<TransactionRecord, RpcFailure> {
        let meta = self.meta.ok_or_else(|| {
            RpcFailure::new(
                RpcErrorKind::NodeBehind,
                "transaction returned without meta".to_owned(),
            )
        })?;

        let mut account_keys = Vec::with_capacity(self.transaction.message.account_keys.len());
        for key in &self.transaction.message.account_keys {
            account_keys.push(parse_address(key, "account key")?);
        }
        if let Some(loaded) = &meta.loaded_addresses {
            for key in loaded.writable.iter().chain(&loaded.readonly) {
                account_keys.push(parse_address(key, "loaded address")?);
            }
        }

        let convert_balances = |balances: Option<Vec<RawTokenBalance>>| {
            balances
                .unwrap_or_default()
                .into_iter()
                .map(|b| {
                    Ok(TokenBalance {
                        account_index: b.account_index,
                        mint: parse_address(&b.mint, "token mint")?,
                        owner: b
                            .owner
                            .as_deref()
                            .map(|o| parse_address(o, "token owner"))
                            .transpose()?,
                        amount: parse_base_units(&b.ui_token_amount.amount)?,
                    })
                })
                .collect::<Result<Vec<_>, RpcFailure>>()
        };

        Ok(TransactionRecord {
            signature,
            slot: self.slot,
            block_time: self.block_time,
            err: meta.err.map(|e| e.to_string()),
            fee: meta.fee,
            account_keys,
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            pre_token_balances: convert_balances(meta.pre_token_balances)?,
            post_token_balances: convert_balances(meta.post_token_balances)?,
        })
    }
}
