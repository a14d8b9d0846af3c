// src/types.rs

//! # Core Type Definitions
//!
//! Shared data structures for the ingestion-and-queueing core: the domain
//! `Transaction` produced by the stream layer, its category, per-connection
//! health state, and per-queue statistics. Centralizing these types keeps the
//! connection, stream, and queue layers decoupled from each other.

use std::time::{Duration, Instant, SystemTime};

use ethers::core::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};

//================================================================================================//
//                                         TRANSACTION                                            //
//================================================================================================//

/// A pending transaction as observed in the mempool.
///
/// Constructed exactly once by the stream layer and never mutated afterwards;
/// it is dropped when popped, evicted, or cleared from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: H256,
    pub from: Address,
    /// `None` means contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub nonce: U256,
    pub data: Bytes,
    /// When this transaction was ingested, used for age-based eviction.
    pub timestamp: Instant,
    pub block_number: Option<U64>,
    pub tx_index: Option<u64>,
    pub chain_id: U256,
}

impl Transaction {
    /// The 4-byte method selector of the calldata, if present.
    pub fn selector(&self) -> Option<[u8; 4]> {
        if self.data.len() < 4 {
            return None;
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&self.data[..4]);
        Some(sel)
    }

    pub fn transaction_type(&self) -> TransactionType {
        TransactionType::classify(&self.data)
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

//================================================================================================//
//                                      TRANSACTION TYPE                                          //
//================================================================================================//

/// DEX router selectors that move tokens through a swap path.
const SWAP_SELECTORS: &[[u8; 4]] = &[
    [0x7f, 0xf3, 0x6a, 0xb5], // swapExactETHForTokens
    [0x38, 0xed, 0x17, 0x39], // swapExactTokensForTokens
    [0x18, 0xcb, 0xaf, 0xe5], // swapExactTokensForETH
    [0x88, 0x03, 0xdb, 0xee], // swapTokensForExactTokens
    [0xfb, 0x3b, 0xdb, 0x41], // swapETHForExactTokens
    [0x4a, 0x25, 0xd9, 0x4a], // swapTokensForExactETH
    [0x5c, 0x11, 0xd7, 0x95], // swapExactTokensForTokensSupportingFeeOnTransferTokens
    [0x41, 0x4b, 0xf3, 0x89], // exactInputSingle (Uniswap V3)
    [0xc0, 0x4b, 0x8d, 0x59], // exactInput (Uniswap V3)
    [0x04, 0xe4, 0x5a, 0xaf], // exactInputSingle (SwapRouter02)
];

/// Router selectors that add or remove pool liquidity.
const LIQUIDITY_SELECTORS: &[[u8; 4]] = &[
    [0xe8, 0xe3, 0x37, 0x00], // addLiquidity
    [0xf3, 0x05, 0xd7, 0x19], // addLiquidityETH
    [0xba, 0xa2, 0xab, 0xde], // removeLiquidity
    [0x02, 0x75, 0x1c, 0xec], // removeLiquidityETH
    [0x88, 0x31, 0x64, 0x56], // mint (Uniswap V3 position manager)
    [0x0c, 0x49, 0xcc, 0xbe], // decreaseLiquidity
    [0x21, 0x9f, 0x5d, 0x17], // increaseLiquidity
];

/// Canonical L1/L2 bridge entry points.
const BRIDGE_SELECTORS: &[[u8; 4]] = &[
    [0x9a, 0x2a, 0xc6, 0xd5], // depositETHTo (OP standard bridge)
    [0x58, 0xa9, 0x97, 0xf6], // depositERC20 (OP standard bridge)
    [0x83, 0x8b, 0x25, 0x20], // depositERC20To (OP standard bridge)
    [0xe1, 0x1e, 0x3d, 0xe9], // depositTransaction (OptimismPortal)
    [0xcd, 0x58, 0x65, 0x79], // depositETH (Arbitrum inbox)
];

/// Token-movement selectors that behave like plain transfers for MEV purposes.
const TRANSFER_SELECTORS: &[[u8; 4]] = &[
    [0xa9, 0x05, 0x9c, 0xbb], // transfer (ERC-20)
    [0x23, 0xb8, 0x72, 0xdd], // transferFrom (ERC-20)
];

/// MEV-relevance category of a transaction, derived deterministically from the
/// 4-byte method selector of its calldata. Empty calldata is a native transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Swap,
    Liquidity,
    Bridge,
    Contract,
    Unknown,
}

impl TransactionType {
    /// Every category, ordered by static MEV relevance. `CategorizedQueueManager`
    /// drains categories in exactly this order.
    pub const PRIORITY_ORDER: [TransactionType; 6] = [
        TransactionType::Swap,
        TransactionType::Liquidity,
        TransactionType::Bridge,
        TransactionType::Transfer,
        TransactionType::Contract,
        TransactionType::Unknown,
    ];

    pub fn classify(data: &[u8]) -> TransactionType {
        if data.is_empty() {
            return TransactionType::Transfer;
        }
        if data.len() < 4 {
            return TransactionType::Unknown;
        }
        let sel: [u8; 4] = [data[0], data[1], data[2], data[3]];
        if SWAP_SELECTORS.contains(&sel) {
            TransactionType::Swap
        } else if LIQUIDITY_SELECTORS.contains(&sel) {
            TransactionType::Liquidity
        } else if BRIDGE_SELECTORS.contains(&sel) {
            TransactionType::Bridge
        } else if TRANSFER_SELECTORS.contains(&sel) {
            TransactionType::Transfer
        } else {
            TransactionType::Contract
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::Swap => "swap",
            TransactionType::Liquidity => "liquidity",
            TransactionType::Bridge => "bridge",
            TransactionType::Contract => "contract",
            TransactionType::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(TransactionType::Transfer),
            "swap" => Ok(TransactionType::Swap),
            "liquidity" => Ok(TransactionType::Liquidity),
            "bridge" => Ok(TransactionType::Bridge),
            "contract" => Ok(TransactionType::Contract),
            "unknown" => Ok(TransactionType::Unknown),
            other => Err(format!("unrecognized transaction type: {}", other)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//================================================================================================//
//                                     CONNECTION HEALTH                                          //
//================================================================================================//

/// Snapshot of one connection's health, mutated only by its owning `WsConnection`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    pub is_healthy: bool,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_ping_time: Option<Instant>,
    /// Round-trip time of the most recent ping/pong exchange.
    pub response_time: Option<Duration>,
}

impl ConnectionHealth {
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.is_healthy = false;
        self.error_count += 1;
        self.last_error = Some(error.into());
    }

    pub fn record_pong(&mut self, round_trip: Duration) {
        self.is_healthy = true;
        self.response_time = Some(round_trip);
    }
}

//================================================================================================//
//                                        QUEUE STATS                                             //
//================================================================================================//

/// Per-queue statistics. `total_processed` and `evicted_count` are cumulative
/// and survive `clear()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub total_processed: u64,
    pub evicted_count: u64,
    #[serde(skip)]
    pub last_eviction: Option<SystemTime>,
}
