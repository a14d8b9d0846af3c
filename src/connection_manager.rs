// src/connection_manager.rs

//! # Connection Manager
//!
//! Owns a priority-ordered set of named endpoints, each wrapping one
//! [`WsConnection`], and performs failover between them: exponential backoff
//! per endpoint, a periodic health sweep, and replacement (never reuse) of
//! failed connections.
//!
//! Per-endpoint state machine: Connected → (failure) → Backoff(n) →
//! (elapsed delay) → Retrying → Connected | Backoff(n+1). An endpoint that
//! exhausts its retries is parked for ten times the maximum delay, after which
//! its failure count resets, so no endpoint is abandoned forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BackoffConfig, ManagerConfig};
use crate::connection::WsConnection;
use crate::errors::{ConnectionError, ManagerError};

/// A configured remote WebSocket RPC address with an assigned priority and an
/// owned connection. Lives for the process lifetime once added; its connection
/// is swapped, never mutated in place, on failure.
struct Endpoint {
    url: String,
    /// Lower values are tried first.
    priority: u32,
    connection: Arc<WsConnection>,
    last_failed: Option<Instant>,
    fail_count: u32,
}

impl Endpoint {
    /// Whether enough time has elapsed since the last failure for a retry.
    /// Resets the failure count when the recovery valve opens.
    fn eligible_for_retry(&mut self, backoff: &BackoffConfig) -> bool {
        if self.fail_count == 0 {
            return true;
        }
        let Some(last_failed) = self.last_failed else {
            return true;
        };
        if self.fail_count >= backoff.max_retries {
            if last_failed.elapsed() > backoff.recovery_delay() {
                debug!(
                    target: "connection_manager",
                    url = %self.url,
                    "Recovery valve opened, resetting failure count"
                );
                self.fail_count = 0;
                return true;
            }
            return false;
        }
        last_failed.elapsed() >= backoff.delay_after(self.fail_count)
    }

    fn record_failure(&mut self) {
        self.last_failed = Some(Instant::now());
        self.fail_count += 1;
    }
}

/// Observability snapshot of one managed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub url: String,
    pub priority: u32,
    pub fail_count: u32,
    pub connected: bool,
    pub healthy: bool,
}

/// Failover coordinator over a set of prioritized WebSocket endpoints.
pub struct ConnectionManager {
    config: ManagerConfig,
    endpoints: RwLock<Vec<Endpoint>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Creates the manager and starts its background health-check loop.
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            endpoints: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        Self::spawn_health_loop(&manager);
        manager
    }

    /// Registers an endpoint. Endpoints are kept sorted ascending by priority;
    /// insertion order breaks ties.
    pub async fn add_endpoint(&self, url: &str, priority: u32) -> Result<(), ManagerError> {
        if url.is_empty() {
            return Err(ManagerError::EmptyUrl);
        }
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| e.url == url) {
            return Err(ManagerError::DuplicateEndpoint(url.to_string()));
        }
        endpoints.push(Endpoint {
            url: url.to_string(),
            priority,
            connection: Arc::new(WsConnection::new(self.config.connection.clone())),
            last_failed: None,
            fail_count: 0,
        });
        endpoints.sort_by_key(|e| e.priority);
        info!(target: "connection_manager", url, priority, "Endpoint added");
        Ok(())
    }

    /// Returns a healthy connection, preferring already-connected endpoints in
    /// priority order and otherwise dialing each retry-eligible endpoint until
    /// one succeeds.
    pub async fn get_connection(&self) -> Result<Arc<WsConnection>, ManagerError> {
        {
            let endpoints = self.endpoints.read().await;
            if endpoints.is_empty() {
                return Err(ManagerError::NoEndpoints);
            }
            for endpoint in endpoints.iter() {
                if endpoint.connection.is_connected()
                    && endpoint.connection.connection_health().is_healthy
                {
                    return Ok(endpoint.connection.clone());
                }
            }
        }

        let mut endpoints = self.endpoints.write().await;
        // Another task may have connected while we waited for the write lock.
        for endpoint in endpoints.iter() {
            if endpoint.connection.is_connected()
                && endpoint.connection.connection_health().is_healthy
            {
                return Ok(endpoint.connection.clone());
            }
        }

        let backoff = self.config.backoff.clone();
        for endpoint in endpoints.iter_mut() {
            if !endpoint.eligible_for_retry(&backoff) {
                continue;
            }
            // A connection is never reused after a failure; dial a fresh one.
            let candidate = Arc::new(WsConnection::new(self.config.connection.clone()));
            match candidate.connect(&endpoint.url).await {
                Ok(()) => {
                    let old = std::mem::replace(&mut endpoint.connection, candidate.clone());
                    let _ = old.close().await;
                    endpoint.fail_count = 0;
                    endpoint.last_failed = None;
                    info!(target: "connection_manager", url = %endpoint.url, "Endpoint connected");
                    return Ok(candidate);
                }
                Err(e) => {
                    endpoint.record_failure();
                    let _ = candidate.close().await;
                    warn!(
                        target: "connection_manager",
                        url = %endpoint.url,
                        fail_count = endpoint.fail_count,
                        error = %e,
                        "Endpoint connection attempt failed"
                    );
                }
            }
        }
        Err(ManagerError::NoHealthyConnections)
    }

    /// Records a failure against the endpoint owning `conn`, closes the failed
    /// connection, and installs a brand-new unconnected instance in its place.
    pub async fn handle_connection_failure(
        &self,
        conn: &Arc<WsConnection>,
    ) -> Result<(), ManagerError> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.connection, conn))
            .ok_or(ManagerError::ConnectionNotFound)?;

        endpoint.record_failure();
        let old = std::mem::replace(
            &mut endpoint.connection,
            Arc::new(WsConnection::new(self.config.connection.clone())),
        );
        let _ = old.close().await;
        warn!(
            target: "connection_manager",
            url = %endpoint.url,
            fail_count = endpoint.fail_count,
            "Connection failed over, fresh connection installed"
        );
        Ok(())
    }

    /// Connections that are currently both connected and healthy.
    pub async fn healthy_connections(&self) -> Vec<Arc<WsConnection>> {
        self.endpoints
            .read()
            .await
            .iter()
            .filter(|e| {
                e.connection.is_connected() && e.connection.connection_health().is_healthy
            })
            .map(|e| e.connection.clone())
            .collect()
    }

    /// Observability snapshot of every managed endpoint.
    pub async fn endpoint_statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .read()
            .await
            .iter()
            .map(|e| EndpointStatus {
                url: e.url.clone(),
                priority: e.priority,
                fail_count: e.fail_count,
                connected: e.connection.is_connected(),
                healthy: e.connection.connection_health().is_healthy,
            })
            .collect()
    }

    /// Idempotently stops the health-check loop and closes every managed
    /// connection, returning the last close error encountered, if any.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let endpoints = self.endpoints.read().await;
        let mut last_error = None;
        for endpoint in endpoints.iter() {
            if let Err(e) = endpoint.connection.close().await {
                last_error = Some(e);
            }
        }
        info!(target: "connection_manager", "Connection manager closed");
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_health_loop(manager: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(manager);
        let cancel = manager.cancel.clone();
        let interval = manager.config.health.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(target: "connection_manager::health", "Health loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let Some(manager) = weak.upgrade() else { return };
                manager.run_health_sweep().await;
            }
        });
    }

    /// Fails over every connected endpoint whose connection is unhealthy,
    /// whose last ping is too old, or whose error count is excessive.
    async fn run_health_sweep(&self) {
        let suspects: Vec<Arc<WsConnection>> = {
            let endpoints = self.endpoints.read().await;
            endpoints
                .iter()
                .filter(|e| e.connection.is_connected())
                .filter(|e| {
                    let health = e.connection.connection_health();
                    let ping_stale = health
                        .last_ping_time
                        .map_or(true, |t| t.elapsed() > self.config.health.max_ping_age());
                    !health.is_healthy
                        || ping_stale
                        || health.error_count > self.config.health.max_error_count
                })
                .map(|e| e.connection.clone())
                .collect()
        };
        for conn in suspects {
            if let Err(e) = self.handle_connection_failure(&conn).await {
                debug!(target: "connection_manager::health", error = %e, "Health sweep failover skipped");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
