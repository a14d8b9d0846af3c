// src/stream.rs

//! # Transaction Stream
//!
//! Stateless-per-call parsing, validation, and filtering of raw subscription
//! bytes into domain [`Transaction`]s. The parser consumes the JSON-RPC
//! `eth_subscription` envelope delivered by a [`WsConnection`](crate::connection::WsConnection)
//! subscription channel; every missing or malformed field is surfaced with a
//! field-specific error so ingestion-quality metrics stay accurate.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ethers::core::types::{Address, H256, U256, U64};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::StreamConfig;
use crate::errors::{StreamError, ValidationError};
use crate::types::Transaction;

const MAX_GAS_LIMIT: u64 = 30_000_000;
const MAX_DATA_BYTES: usize = 1024 * 1024;

//================================================================================================//
//                                       WIRE ENVELOPE                                            //
//================================================================================================//

#[derive(Debug, Deserialize)]
struct SubscriptionEnvelope {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    method: Option<String>,
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    #[allow(dead_code)]
    subscription: Option<String>,
    result: serde_json::Value,
}

/// The hex-encoded transaction payload as delivered by `eth_subscribe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: Option<String>,
    from: Option<String>,
    to: Option<String>,
    value: Option<String>,
    gas_price: Option<String>,
    gas: Option<String>,
    nonce: Option<String>,
    input: Option<String>,
    block_number: Option<String>,
    transaction_index: Option<String>,
    chain_id: Option<String>,
}

fn parse_u256(field: &'static str, raw: &str) -> Result<U256, StreamError> {
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| StreamError::InvalidField { field, value: raw.to_string() })?;
    U256::from_str_radix(hex, 16).map_err(|_| StreamError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_u64(field: &'static str, raw: &str) -> Result<u64, StreamError> {
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| StreamError::InvalidField { field, value: raw.to_string() })?;
    u64::from_str_radix(hex, 16).map_err(|_| StreamError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_address(field: &'static str, raw: &str) -> Result<Address, StreamError> {
    Address::from_str(raw).map_err(|_| StreamError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

//================================================================================================//
//                                      STREAM STATISTICS                                         //
//================================================================================================//

/// Atomic counters tracking ingestion quality. Owned by whoever drives the
/// stream (see [`IngestPipeline`](crate::pipeline::IngestPipeline)); snapshots
/// are taken via [`StreamStats::snapshot`].
#[derive(Debug, Default)]
pub struct StreamStats {
    pub received: AtomicU64,
    pub parsed: AtomicU64,
    pub parse_failures: AtomicU64,
    pub validation_failures: AtomicU64,
    pub filtered: AtomicU64,
    pub enqueued: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub received: u64,
    pub parsed: u64,
    pub parse_failures: u64,
    pub validation_failures: u64,
    pub filtered: u64,
    pub enqueued: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamMetrics {
        StreamMetrics {
            received: self.received.load(Ordering::Relaxed),
            parsed: self.parsed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
        }
    }
}

//================================================================================================//
//                                     TRANSACTION FILTER                                         //
//================================================================================================//

/// Admission policy consulted before a transaction enters the queues.
pub trait TransactionFilter: Send + Sync {
    fn should_process(&self, tx: &Transaction) -> bool;
}

/// A filter that admits everything; useful as a queue-manager default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl TransactionFilter for AllowAll {
    fn should_process(&self, _tx: &Transaction) -> bool {
        true
    }
}

//================================================================================================//
//                                     TRANSACTION STREAM                                         //
//================================================================================================//

/// Parser/validator/filter for raw subscription messages.
///
/// Holds only immutable configuration; every call is independent, so a single
/// instance can be shared freely across tasks.
pub struct TransactionStream {
    config: StreamConfig,
    method_filters: HashSet<[u8; 4]>,
}

impl TransactionStream {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        if config.min_gas_price > config.max_gas_price {
            return Err(StreamError::Config(format!(
                "min gas price {} exceeds max gas price {}",
                config.min_gas_price, config.max_gas_price
            )));
        }
        let mut method_filters = HashSet::with_capacity(config.method_filters.len());
        for raw in &config.method_filters {
            let hex_str = raw.strip_prefix("0x").unwrap_or(raw);
            let bytes = hex::decode(hex_str)
                .map_err(|_| StreamError::Config(format!("invalid method selector: {}", raw)))?;
            if bytes.len() != 4 {
                return Err(StreamError::Config(format!(
                    "method selector must be 4 bytes: {}",
                    raw
                )));
            }
            method_filters.insert([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        Ok(Self { config, method_filters })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Parses one raw subscription message into a domain transaction.
    pub fn process_transaction(&self, raw: &[u8]) -> Result<Transaction, StreamError> {
        let envelope: SubscriptionEnvelope =
            serde_json::from_slice(raw).map_err(|e| StreamError::Parse(e.to_string()))?;

        match envelope.method.as_deref() {
            Some("eth_subscription") => {}
            Some(other) => return Err(StreamError::UnexpectedMethod(other.to_string())),
            None => return Err(StreamError::MissingField("method")),
        }
        let params = envelope.params.ok_or(StreamError::MissingField("params"))?;
        let raw_tx: RawTransaction = serde_json::from_value(params.result)
            .map_err(|e| StreamError::Parse(e.to_string()))?;

        let hash_str = raw_tx.hash.ok_or(StreamError::MissingField("hash"))?;
        if hash_str.is_empty() {
            return Err(StreamError::MissingField("hash"));
        }
        if hash_str.len() != 66 || !hash_str.starts_with("0x") {
            return Err(StreamError::InvalidField { field: "hash", value: hash_str });
        }
        let hash = H256::from_str(&hash_str)
            .map_err(|_| StreamError::InvalidField { field: "hash", value: hash_str.clone() })?;

        let from_str = raw_tx.from.ok_or(StreamError::MissingField("from"))?;
        let from = parse_address("from", &from_str)?;

        // Absent or empty `to` means contract creation.
        let to = match raw_tx.to.as_deref() {
            None | Some("") => None,
            Some(s) => Some(parse_address("to", s)?),
        };

        let value_str = raw_tx.value.ok_or(StreamError::MissingField("value"))?;
        let value = parse_u256("value", &value_str)?;

        let gas_price_str = raw_tx.gas_price.ok_or(StreamError::MissingField("gasPrice"))?;
        let gas_price = parse_u256("gasPrice", &gas_price_str)?;

        let gas_str = raw_tx.gas.ok_or(StreamError::MissingField("gas"))?;
        let gas_limit = parse_u256("gas", &gas_str)?;

        let nonce_str = raw_tx.nonce.ok_or(StreamError::MissingField("nonce"))?;
        let nonce = parse_u256("nonce", &nonce_str)?;

        let input_str = raw_tx.input.ok_or(StreamError::MissingField("input"))?;
        let input_hex = input_str.strip_prefix("0x").unwrap_or(&input_str);
        let data = hex::decode(input_hex)
            .map_err(|_| StreamError::InvalidField { field: "input", value: input_str.clone() })?
            .into();

        let block_number = match raw_tx.block_number.as_deref() {
            None | Some("") => None,
            Some(s) => Some(U64::from(parse_u64("blockNumber", s)?)),
        };
        let tx_index = match raw_tx.transaction_index.as_deref() {
            None | Some("") => None,
            Some(s) => Some(parse_u64("transactionIndex", s)?),
        };
        let chain_id = match raw_tx.chain_id.as_deref() {
            None | Some("") => U256::from(self.config.default_chain_id),
            Some(s) => parse_u256("chainId", s)?,
        };

        let tx = Transaction {
            hash,
            from,
            to,
            value,
            gas_price,
            gas_limit,
            nonce,
            data,
            timestamp: Instant::now(),
            block_number,
            tx_index,
            chain_id,
        };
        trace!(target: "transaction_stream", hash = ?tx.hash, "Parsed pending transaction");
        Ok(tx)
    }

    /// Admission check against the configured gas/value bounds and allow-lists.
    ///
    /// With a non-empty method filter, empty-calldata transfers are excluded
    /// as well: they carry no selector to match.
    pub fn filter_transaction(&self, tx: &Transaction) -> bool {
        if tx.gas_price < self.config.min_gas_price || tx.gas_price > self.config.max_gas_price {
            return false;
        }
        if tx.value < self.config.min_value {
            return false;
        }
        if !self.config.contract_filters.is_empty() {
            // Contract creations never match the address allow-list.
            let matches = tx
                .to
                .map_or(false, |to| self.config.contract_filters.contains(&to));
            if !matches {
                return false;
            }
        }
        if !self.method_filters.is_empty() {
            let Some(selector) = tx.selector() else {
                return false;
            };
            if !self.method_filters.contains(&selector) {
                return false;
            }
        }
        true
    }

    /// Structural validation of a parsed transaction; returns the first
    /// violation found.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ValidationError> {
        if tx.hash.is_zero() {
            return Err(ValidationError::EmptyHash);
        }
        if tx.from.is_zero() {
            return Err(ValidationError::ZeroSender);
        }
        if tx.gas_price.is_zero() {
            return Err(ValidationError::NonPositiveGasPrice);
        }
        if tx.gas_limit.is_zero() || tx.gas_limit > U256::from(MAX_GAS_LIMIT) {
            return Err(ValidationError::GasLimitOutOfRange(tx.gas_limit.low_u64()));
        }
        if tx.chain_id.is_zero() {
            return Err(ValidationError::NonPositiveChainId);
        }
        if tx.data.len() > MAX_DATA_BYTES {
            return Err(ValidationError::OversizedData(tx.data.len()));
        }
        Ok(())
    }
}

impl TransactionFilter for TransactionStream {
    fn should_process(&self, tx: &Transaction) -> bool {
        self.filter_transaction(tx)
    }
}
