// src/pipeline.rs

//! # Ingest Pipeline
//!
//! Background task that drives the full ingestion path: obtain a connection
//! from the [`ConnectionManager`], subscribe to pending transactions, parse
//! and validate each notification through the [`TransactionStream`], and route
//! survivors into the [`CategorizedQueueManager`]. When a subscription stream
//! ends the failed connection is reported to the manager and a replacement is
//! requested, so failover policy stays in one place.
//!
//! Parse and validation failures never kill the task; they are logged and
//! counted so ingestion quality stays observable.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection_manager::ConnectionManager;
use crate::errors::QueueError;
use crate::queue_manager::CategorizedQueueManager;
use crate::stream::{StreamMetrics, StreamStats, TransactionStream};

const PENDING_TX_SUBSCRIPTION: &str = "newPendingTransactions";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Wires connections, the transaction stream, and the categorized queues into
/// one supervised ingestion task.
pub struct IngestPipeline {
    manager: Arc<ConnectionManager>,
    stream: Arc<TransactionStream>,
    queues: Arc<CategorizedQueueManager>,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
    task_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IngestPipeline {
    pub fn new(
        manager: Arc<ConnectionManager>,
        stream: Arc<TransactionStream>,
        queues: Arc<CategorizedQueueManager>,
    ) -> Self {
        Self {
            manager,
            stream,
            queues,
            stats: Arc::new(StreamStats::default()),
            cancel: CancellationToken::new(),
            task_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawns the ingestion task. Idempotent per instance: a second call
    /// replaces a finished task but never runs two at once.
    pub async fn start(&self) {
        let mut handle_slot = self.task_handle.lock().await;
        if let Some(handle) = handle_slot.as_ref() {
            if !handle.is_finished() {
                warn!(target: "ingest_pipeline", "Pipeline already running");
                return;
            }
        }

        info!(target: "ingest_pipeline", "Starting mempool ingestion pipeline");
        let manager = self.manager.clone();
        let stream = self.stream.clone();
        let queues = self.queues.clone();
        let stats = self.stats.clone();
        let cancel = self.cancel.clone();

        *handle_slot = Some(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    info!(target: "ingest_pipeline", "Shutdown signal received, stopping pipeline");
                    return;
                }

                let conn = match manager.get_connection().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(target: "ingest_pipeline", error = %e, "No connection available, retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        }
                    }
                };

                let mut rx = match conn.subscribe(PENDING_TX_SUBSCRIPTION, &[]).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        error!(target: "ingest_pipeline", error = %e, "Subscription failed, failing connection over");
                        if let Err(e) = manager.handle_connection_failure(&conn).await {
                            debug!(target: "ingest_pipeline", error = %e, "Failover skipped");
                        }
                        continue;
                    }
                };
                info!(target: "ingest_pipeline", "Subscribed to pending transactions");

                loop {
                    let raw = tokio::select! {
                        _ = cancel.cancelled() => {
                            info!(target: "ingest_pipeline", "Shutdown signal received, stopping pipeline");
                            return;
                        }
                        raw = rx.recv() => raw,
                    };
                    let Some(raw) = raw else {
                        warn!(target: "ingest_pipeline", "Subscription stream ended, reconnecting");
                        if let Err(e) = manager.handle_connection_failure(&conn).await {
                            debug!(target: "ingest_pipeline", error = %e, "Failover skipped");
                        }
                        break;
                    };

                    stats.received.fetch_add(1, Ordering::Relaxed);
                    let tx = match stream.process_transaction(&raw) {
                        Ok(tx) => tx,
                        Err(e) => {
                            stats.parse_failures.fetch_add(1, Ordering::Relaxed);
                            debug!(target: "ingest_pipeline", error = %e, "Dropped unparseable notification");
                            continue;
                        }
                    };
                    stats.parsed.fetch_add(1, Ordering::Relaxed);

                    if let Err(e) = stream.validate_transaction(&tx) {
                        stats.validation_failures.fetch_add(1, Ordering::Relaxed);
                        debug!(target: "ingest_pipeline", hash = ?tx.hash, error = %e, "Dropped invalid transaction");
                        continue;
                    }

                    match queues.add_transaction(tx) {
                        Ok(category) => {
                            stats.enqueued.fetch_add(1, Ordering::Relaxed);
                            debug!(target: "ingest_pipeline", %category, "Transaction enqueued");
                        }
                        Err(QueueError::FilteredOut) => {
                            stats.filtered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(QueueError::DuplicateTransaction(hash)) => {
                            debug!(target: "ingest_pipeline", ?hash, "Dropped duplicate transaction");
                        }
                        Err(e) => {
                            error!(target: "ingest_pipeline", error = %e, "Failed to enqueue transaction");
                        }
                    }
                }
            }
        }));
    }

    /// Stops the ingestion task and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(target: "ingest_pipeline", "Ingestion task panicked during shutdown: {:?}", e);
            }
        }
        info!(target: "ingest_pipeline", "Ingestion pipeline stopped");
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.stats.snapshot()
    }

    pub fn queues(&self) -> &Arc<CategorizedQueueManager> {
        &self.queues
    }
}
