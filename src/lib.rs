// src/lib.rs

//! # mempool-ingest
//!
//! Ingestion-and-queueing core for MEV strategy detection: multi-endpoint
//! WebSocket connection management with health monitoring and
//! exponential-backoff failover, parsing/validation/filtering of raw
//! pending-transaction notifications into domain transactions, and
//! capacity- and age-bounded priority queues partitioned by transaction
//! category.
//!
//! Strategy detectors, the API server, and the CLI are external consumers of
//! [`connection_manager::ConnectionManager`], [`stream::TransactionStream`],
//! and [`queue_manager::CategorizedQueueManager`]; no other internal state is
//! reachable from outside this crate.

pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod errors;
pub mod pipeline;
pub mod queue;
pub mod queue_manager;
pub mod stream;
pub mod types;

pub use config::{BackoffConfig, ConnectionConfig, HealthCheckConfig, ManagerConfig, QueueConfig, StreamConfig};
pub use connection::WsConnection;
pub use connection_manager::{ConnectionManager, EndpointStatus};
pub use errors::{ConnectionError, IngestError, ManagerError, QueueError, StreamError, ValidationError};
pub use pipeline::IngestPipeline;
pub use queue::{AgeEvictable, PriorityQueue, TransactionQueue};
pub use queue_manager::{CategorizedQueueManager, QueueManager};
pub use stream::{TransactionFilter, TransactionStream};
pub use types::{ConnectionHealth, QueueStats, Transaction, TransactionType};
