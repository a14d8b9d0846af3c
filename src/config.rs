// src/config.rs

//! # Component Configuration
//!
//! Immutable configuration values for the ingestion core. Every component
//! receives its configuration explicitly through its constructor; nothing in
//! this crate reads ambient global state. Durations are stored as plain
//! integer fields so the structs round-trip cleanly through JSON config files,
//! with typed accessors for use in code.

use std::time::Duration;

use ethers::core::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Selectors admitted by default when no explicit method filter is configured:
/// the common V2/V3 router swap and liquidity entry points.
pub const DEFAULT_METHOD_FILTERS: &[&str] = &[
    "7ff36ab5", // swapExactETHForTokens
    "38ed1739", // swapExactTokensForTokens
    "18cbafe5", // swapExactTokensForETH
    "8803dbee", // swapTokensForExactTokens
    "5c11d795", // swapExactTokensForTokensSupportingFeeOnTransferTokens
    "414bf389", // exactInputSingle
    "e8e33700", // addLiquidity
    "f305d719", // addLiquidityETH
    "baa2abde", // removeLiquidity
    "02751cec", // removeLiquidityETH
];

//================================================================================================//
//                                   CONNECTION SETTINGS                                          //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Handshake timeout for the initial WebSocket dial.
    pub connect_timeout_secs: u64,
    /// Interval of the keepalive ping loop.
    pub ping_interval_secs: u64,
    /// Capacity of each subscription channel; the read loop drops messages
    /// for a subscription whose channel is full rather than block ingestion.
    pub subscription_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            ping_interval_secs: 30,
            subscription_buffer: 100,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

//================================================================================================//
//                                     BACKOFF SETTINGS                                           //
//================================================================================================//

/// Retry policy for failed endpoints. The effective delay after `n` failures
/// is `min(base_delay * 2^(n-1), max_delay)`; once `max_retries` is reached
/// the endpoint is parked until `max_delay * 10` has elapsed, after which its
/// failure count resets so the endpoint is never permanently abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 5,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Minimum elapsed time after the n-th consecutive failure before the
    /// endpoint becomes eligible for a retry.
    pub fn delay_after(&self, fail_count: u32) -> Duration {
        let exp = fail_count.saturating_sub(1).min(32);
        let delay = self
            .base_delay()
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay())
    }

    /// Park time for an endpoint that exhausted `max_retries`.
    pub fn recovery_delay(&self) -> Duration {
        self.max_delay().saturating_mul(10)
    }
}

//================================================================================================//
//                                   HEALTH CHECK SETTINGS                                        //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval of the manager's background health sweep.
    pub interval_secs: u64,
    /// A connection whose last successful ping is older than this is failed over.
    pub max_ping_age_secs: u64,
    /// A connection that accumulated more errors than this is failed over.
    pub max_error_count: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_ping_age_secs: 120,
            max_error_count: 5,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_ping_age(&self) -> Duration {
        Duration::from_secs(self.max_ping_age_secs)
    }
}

/// Aggregate settings for the connection manager and the connections it owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub connection: ConnectionConfig,
    pub backoff: BackoffConfig,
    pub health: HealthCheckConfig,
}

//================================================================================================//
//                                     STREAM SETTINGS                                            //
//================================================================================================//

/// Parsing and filtering bounds for the transaction stream.
///
/// An empty `contract_filters` list disables the address check; an empty
/// `method_filters` list disables the selector check. Note that a non-empty
/// method filter also excludes plain transfers (empty calldata carries no
/// selector to match).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub min_gas_price: U256,
    pub max_gas_price: U256,
    pub min_value: U256,
    /// Allow-list of `to` addresses. Contract creations never match.
    pub contract_filters: Vec<Address>,
    /// Allow-list of 4-byte method selectors, hex-encoded with or without a
    /// `0x` prefix, case-insensitive.
    pub method_filters: Vec<String>,
    /// Applied when a notification carries no `chainId` field.
    pub default_chain_id: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_gas_price: U256::one(),
            // 10,000 gwei; anything above is noise or a fat-fingered bid.
            max_gas_price: U256::from(10_000u64) * U256::exp10(9),
            min_value: U256::zero(),
            contract_filters: Vec::new(),
            method_filters: DEFAULT_METHOD_FILTERS.iter().map(|s| s.to_string()).collect(),
            default_chain_id: 8453,
        }
    }
}

impl StreamConfig {
    /// A configuration with every filter dimension disabled, as a base for the
    /// `with_*` builders.
    pub fn permissive() -> Self {
        Self {
            min_gas_price: U256::one(),
            max_gas_price: U256::MAX,
            min_value: U256::zero(),
            contract_filters: Vec::new(),
            method_filters: Vec::new(),
            default_chain_id: 8453,
        }
    }

    pub fn with_min_gas_price(mut self, min: U256) -> Self {
        self.min_gas_price = min;
        self
    }

    pub fn with_max_gas_price(mut self, max: U256) -> Self {
        self.max_gas_price = max;
        self
    }

    pub fn with_min_value(mut self, min: U256) -> Self {
        self.min_value = min;
        self
    }

    pub fn with_contract_filters(mut self, addresses: Vec<Address>) -> Self {
        self.contract_filters = addresses;
        self
    }

    pub fn with_method_filters<S: Into<String>>(mut self, selectors: Vec<S>) -> Self {
        self.method_filters = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_chain_id(mut self, chain_id: u64) -> Self {
        self.default_chain_id = chain_id;
        self
    }
}

//================================================================================================//
//                                      QUEUE SETTINGS                                            //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum entries held per queue; a push beyond this evicts the
    /// globally oldest entry rather than rejecting the new one.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}
