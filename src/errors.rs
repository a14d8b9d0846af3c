// src/errors.rs

//! # Centralized Error Handling
//!
//! A hierarchical, typed error system for the ingestion core. Each subsystem
//! owns its own error enum; `IngestError` wraps them all so callers at the
//! pipeline boundary can hold a single error type without losing the original
//! failure class.

use ethers::core::types::H256;
use thiserror::Error;

use crate::types::TransactionType;

/// The top-level error type, encapsulating all failures within the ingestion core.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Connection manager error: {0}")]
    Manager(#[from] ManagerError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Failures of a single WebSocket connection. Transient network errors here
/// are never retried by the connection itself; retry policy lives in the
/// connection manager.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection not established")]
    NotEstablished,
    #[error("connection handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
    #[error("failed to send subscribe request: {0}")]
    SubscribeFailed(String),
}

/// Failures of endpoint bookkeeping and failover. Configuration variants are
/// rejected synchronously and never retried.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("endpoint URL cannot be empty")]
    EmptyUrl,
    #[error("endpoint {0} already exists")]
    DuplicateEndpoint(String),
    #[error("no endpoints configured")]
    NoEndpoints,
    #[error("no healthy connections available")]
    NoHealthyConnections,
    #[error("connection not found")]
    ConnectionNotFound,
}

/// Failures turning raw subscription bytes into a domain transaction.
/// Always surfaced to the caller; the offending message is dropped, never retried.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Rejected synchronously at construction time, never retried.
    #[error("invalid filter configuration: {0}")]
    Config(String),
    #[error("failed to parse subscription message: {0}")]
    Parse(String),
    #[error("unexpected JSON-RPC method: {0}")]
    UnexpectedMethod(String),
    #[error("missing field in transaction payload: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Structural violations found on an already-parsed transaction.
/// The first violation encountered is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("transaction hash is empty")]
    EmptyHash,
    #[error("transaction sender is the zero address")]
    ZeroSender,
    #[error("gas price must be positive")]
    NonPositiveGasPrice,
    #[error("gas limit {0} out of range (0, 30000000]")]
    GasLimitOutOfRange(u64),
    #[error("chain id must be positive")]
    NonPositiveChainId,
    #[error("calldata of {0} bytes exceeds 1 MiB limit")]
    OversizedData(usize),
}

/// Failures of the priority queues and their managers.
#[derive(Error, Debug)]
pub enum QueueError {
    /// A correctness rejection, distinct from capacity exhaustion (which is
    /// resolved by eviction, not rejection). No state is mutated.
    #[error("transaction {0:?} already exists in queue")]
    DuplicateTransaction(H256),
    #[error("queue is empty")]
    Empty,
    #[error("no transactions available in any queue")]
    NoTransactionsAvailable,
    #[error("queue for category {0} is empty")]
    CategoryEmpty(TransactionType),
    #[error("transaction filtered out")]
    FilteredOut,
    #[error("queue does not support age-based eviction")]
    AgeEvictionUnsupported,
}
