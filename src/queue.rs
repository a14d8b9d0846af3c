// src/queue.rs

//! # Priority Queue
//!
//! A capacity-bounded, indexed binary heap over pending transactions, ordered
//! by gas price descending with nonce ascending as the tie-break. A hash →
//! heap-position index gives O(1) lookups; the index is rebuilt after every
//! mutating operation, which is acceptable at the bounded sizes this queue
//! targets (tens of thousands of entries at most).
//!
//! All operations are linearizable under the queue's own lock: a `pop` always
//! returns the maximum element visible at call time, and no caller ever
//! observes a partially-updated heap.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};

use ethers::core::types::H256;
use tracing::debug;

use crate::config::QueueConfig;
use crate::errors::QueueError;
use crate::types::{QueueStats, Transaction};

//================================================================================================//
//                                        CAPABILITIES                                            //
//================================================================================================//

/// Read-side queue surface consumed by bookkeeping wrappers.
pub trait TransactionQueue: Send + Sync {
    fn size(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn stats(&self) -> QueueStats;
}

/// Capability to evict entries older than a cutoff. Implemented by queues that
/// track ingestion timestamps; callers hold this capability explicitly instead
/// of downcasting to a concrete queue type.
pub trait AgeEvictable: Send + Sync {
    /// Removes every entry with a timestamp strictly before `cutoff`,
    /// returning how many were evicted.
    fn evict_older_than(&self, cutoff: Instant) -> usize;
}

//================================================================================================//
//                                       PRIORITY QUEUE                                           //
//================================================================================================//

/// `true` if `a` outranks `b`: higher gas price first, lower nonce breaking ties.
fn ranks_above(a: &Transaction, b: &Transaction) -> bool {
    if a.gas_price != b.gas_price {
        return a.gas_price > b.gas_price;
    }
    a.nonce < b.nonce
}

struct QueueInner {
    heap: Vec<Arc<Transaction>>,
    index: HashMap<H256, usize>,
    stats: QueueStats,
}

impl QueueInner {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, tx) in self.heap.iter().enumerate() {
            self.index.insert(tx.hash, pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if ranks_above(&self.heap[pos], &self.heap[parent]) {
                self.heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = 2 * pos + 2;
            let mut best = pos;
            if left < len && ranks_above(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && ranks_above(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == pos {
                break;
            }
            self.heap.swap(pos, best);
            pos = best;
        }
    }

    /// Removes the element at `pos` while preserving the heap invariant:
    /// swap with the last element, shrink, then repair in both directions.
    fn remove_at(&mut self, pos: usize) -> Arc<Transaction> {
        let last = self.heap.len() - 1;
        self.heap.swap(pos, last);
        let removed = self.heap.pop().expect("non-empty by construction");
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
        removed
    }

    /// Position of the entry with the earliest ingestion timestamp.
    fn oldest_position(&self) -> Option<usize> {
        self.heap
            .iter()
            .enumerate()
            .min_by_key(|(_, tx)| tx.timestamp)
            .map(|(pos, _)| pos)
    }
}

/// Bounded max-heap of pending transactions with O(1) hash lookup.
pub struct PriorityQueue {
    inner: RwLock<QueueInner>,
}

impl PriorityQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: RwLock::new(QueueInner {
                heap: Vec::new(),
                index: HashMap::new(),
                stats: QueueStats {
                    max_size: config.capacity,
                    ..QueueStats::default()
                },
            }),
        }
    }

    /// Inserts a transaction.
    ///
    /// Rejects a duplicate hash with no state change. When the queue is at
    /// capacity, the globally oldest entry by ingestion timestamp is evicted
    /// first; capacity is enforced by eviction, never by rejecting the push.
    pub fn push(&self, tx: Transaction) -> Result<(), QueueError> {
        let mut inner = self.inner.write().expect("queue lock poisoned");
        if inner.index.contains_key(&tx.hash) {
            return Err(QueueError::DuplicateTransaction(tx.hash));
        }

        if inner.stats.max_size > 0 && inner.heap.len() >= inner.stats.max_size {
            if let Some(pos) = inner.oldest_position() {
                let evicted = inner.remove_at(pos);
                inner.stats.evicted_count += 1;
                inner.stats.last_eviction = Some(SystemTime::now());
                debug!(
                    target: "priority_queue",
                    evicted = ?evicted.hash,
                    incoming = ?tx.hash,
                    "Queue at capacity, evicted oldest transaction"
                );
            }
        }

        inner.heap.push(Arc::new(tx));
        let last = inner.heap.len() - 1;
        inner.sift_up(last);
        inner.rebuild_index();
        inner.stats.total_processed += 1;
        inner.stats.current_size = inner.heap.len();
        Ok(())
    }

    /// Removes and returns the highest-priority transaction.
    pub fn pop(&self) -> Result<Arc<Transaction>, QueueError> {
        let mut inner = self.inner.write().expect("queue lock poisoned");
        if inner.heap.is_empty() {
            return Err(QueueError::Empty);
        }
        let top = inner.remove_at(0);
        inner.rebuild_index();
        inner.stats.current_size = inner.heap.len();
        Ok(top)
    }

    /// Returns the highest-priority transaction without removing it.
    pub fn peek(&self) -> Result<Arc<Transaction>, QueueError> {
        let inner = self.inner.read().expect("queue lock poisoned");
        inner.heap.first().cloned().ok_or(QueueError::Empty)
    }

    pub fn get_by_hash(&self, hash: &H256) -> Option<Arc<Transaction>> {
        let inner = self.inner.read().expect("queue lock poisoned");
        inner.index.get(hash).map(|&pos| inner.heap[pos].clone())
    }

    /// Removes the transaction with the given hash, if present.
    pub fn remove_by_hash(&self, hash: &H256) -> bool {
        let mut inner = self.inner.write().expect("queue lock poisoned");
        let Some(&pos) = inner.index.get(hash) else {
            return false;
        };
        inner.remove_at(pos);
        inner.rebuild_index();
        inner.stats.current_size = inner.heap.len();
        true
    }

    /// Empties the queue. Cumulative counters (`total_processed`,
    /// `evicted_count`) are preserved.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("queue lock poisoned");
        inner.heap.clear();
        inner.index.clear();
        inner.stats.current_size = 0;
    }
}

impl TransactionQueue for PriorityQueue {
    fn size(&self) -> usize {
        self.inner.read().expect("queue lock poisoned").heap.len()
    }

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn stats(&self) -> QueueStats {
        self.inner.read().expect("queue lock poisoned").stats.clone()
    }
}

impl AgeEvictable for PriorityQueue {
    fn evict_older_than(&self, cutoff: Instant) -> usize {
        let mut inner = self.inner.write().expect("queue lock poisoned");
        let mut evicted = 0usize;
        while let Some(pos) = inner.heap.iter().position(|tx| tx.timestamp < cutoff) {
            inner.remove_at(pos);
            evicted += 1;
        }
        if evicted > 0 {
            inner.rebuild_index();
            inner.stats.current_size = inner.heap.len();
            inner.stats.evicted_count += evicted as u64;
            inner.stats.last_eviction = Some(SystemTime::now());
            debug!(target: "priority_queue", evicted, "Evicted aged transactions");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::core::types::{Address, Bytes, U256};
    use std::time::Duration;

    fn tx(id: u64, gas_price: u64, nonce: u64) -> Transaction {
        Transaction {
            hash: H256::from_low_u64_be(id),
            from: Address::from_low_u64_be(1),
            to: Some(Address::from_low_u64_be(2)),
            value: U256::from(1_000u64),
            gas_price: U256::from(gas_price),
            gas_limit: U256::from(21_000u64),
            nonce: U256::from(nonce),
            data: Bytes::new(),
            timestamp: Instant::now(),
            block_number: None,
            tx_index: None,
            chain_id: U256::from(8453u64),
        }
    }

    fn tx_aged(id: u64, gas_price: u64, age: Duration) -> Transaction {
        let mut t = tx(id, gas_price, 0);
        t.timestamp = Instant::now() - age;
        t
    }

    fn queue(capacity: usize) -> PriorityQueue {
        PriorityQueue::new(QueueConfig { capacity })
    }

    #[test]
    fn pops_in_descending_gas_price_order() {
        let q = queue(100);
        for (i, gas) in [50u64, 300, 100, 200, 150].iter().enumerate() {
            q.push(tx(i as u64 + 1, *gas, i as u64)).unwrap();
        }
        let mut popped = Vec::new();
        while let Ok(t) = q.pop() {
            popped.push(t.gas_price.as_u64());
        }
        assert_eq!(popped, vec![300, 200, 150, 100, 50]);
    }

    #[test]
    fn nonce_breaks_gas_price_ties() {
        let q = queue(100);
        for (i, nonce) in [5u64, 2, 8].iter().enumerate() {
            q.push(tx(i as u64 + 1, 100, *nonce)).unwrap();
        }
        let nonces: Vec<u64> = (0..3).map(|_| q.pop().unwrap().nonce.as_u64()).collect();
        assert_eq!(nonces, vec![2, 5, 8]);
    }

    #[test]
    fn capacity_evicts_oldest_by_timestamp() {
        let q = queue(3);
        q.push(tx_aged(1, 100, Duration::from_secs(30))).unwrap();
        q.push(tx_aged(2, 400, Duration::from_secs(60))).unwrap(); // oldest
        q.push(tx_aged(3, 200, Duration::from_secs(10))).unwrap();
        q.push(tx(4, 300, 0)).unwrap();

        assert_eq!(q.size(), 3);
        // The oldest entry is gone even though it had the highest gas price.
        assert!(q.get_by_hash(&H256::from_low_u64_be(2)).is_none());
        assert!(q.get_by_hash(&H256::from_low_u64_be(4)).is_some());

        let stats = q.stats();
        assert_eq!(stats.evicted_count, 1);
        assert!(stats.last_eviction.is_some());
    }

    #[test]
    fn get_and_remove_by_hash_round_trip() {
        let q = queue(100);
        let t = tx(7, 100, 0);
        let hash = t.hash;
        q.push(t).unwrap();

        let found = q.get_by_hash(&hash).expect("pushed transaction must be indexed");
        assert_eq!(found.hash, hash);

        assert!(q.remove_by_hash(&hash));
        assert!(q.get_by_hash(&hash).is_none());
        assert!(!q.remove_by_hash(&hash));
    }

    #[test]
    fn duplicate_hash_is_rejected_without_state_change() {
        let q = queue(100);
        q.push(tx(1, 100, 0)).unwrap();
        let err = q.push(tx(1, 999, 5)).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateTransaction(_)));
        assert_eq!(q.size(), 1);
        assert_eq!(q.stats().total_processed, 1);
        // The original entry is untouched.
        assert_eq!(q.peek().unwrap().gas_price.as_u64(), 100);
    }

    #[test]
    fn peek_does_not_mutate() {
        let q = queue(100);
        q.push(tx(1, 100, 0)).unwrap();
        assert_eq!(q.peek().unwrap().hash, q.peek().unwrap().hash);
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn empty_queue_errors() {
        let q = queue(100);
        assert!(matches!(q.pop(), Err(QueueError::Empty)));
        assert!(matches!(q.peek(), Err(QueueError::Empty)));
    }

    #[test]
    fn clear_preserves_cumulative_counters() {
        let q = queue(2);
        q.push(tx_aged(1, 100, Duration::from_secs(10))).unwrap();
        q.push(tx(2, 200, 0)).unwrap();
        q.push(tx(3, 300, 0)).unwrap(); // evicts tx 1
        q.clear();

        let stats = q.stats();
        assert_eq!(stats.current_size, 0);
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.evicted_count, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn removal_from_middle_preserves_heap_order() {
        let q = queue(100);
        for (i, gas) in [10u64, 90, 40, 70, 20, 60].iter().enumerate() {
            q.push(tx(i as u64 + 1, *gas, 0)).unwrap();
        }
        // Remove a mid-priority entry, then verify full drain order.
        assert!(q.remove_by_hash(&H256::from_low_u64_be(4))); // gas 70
        let mut popped = Vec::new();
        while let Ok(t) = q.pop() {
            popped.push(t.gas_price.as_u64());
        }
        assert_eq!(popped, vec![90, 60, 40, 20, 10]);
    }

    #[test]
    fn age_eviction_removes_only_aged_entries() {
        let q = queue(100);
        q.push(tx_aged(1, 100, Duration::from_secs(600))).unwrap();
        q.push(tx_aged(2, 200, Duration::from_secs(400))).unwrap();
        q.push(tx(3, 300, 0)).unwrap();

        let evicted = q.evict_older_than(Instant::now() - Duration::from_secs(300));
        assert_eq!(evicted, 2);
        assert_eq!(q.size(), 1);
        assert_eq!(q.stats().evicted_count, 2);
        assert!(q.get_by_hash(&H256::from_low_u64_be(3)).is_some());
    }
}
