// src/queue_manager.rs

//! # Categorized Queue Management
//!
//! [`CategorizedQueueManager`] fans incoming transactions out into one
//! [`PriorityQueue`] per [`TransactionType`] behind a shared admission filter,
//! and drains them according to a fixed MEV-relevance ranking:
//! swap > liquidity > bridge > transfer > contract > unknown.
//!
//! [`QueueManager`] is a thin bookkeeping wrapper over a single queue that
//! mirrors its stats and performs age-based eviction through the explicit
//! [`AgeEvictable`] capability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::errors::QueueError;
use crate::queue::{AgeEvictable, PriorityQueue, TransactionQueue};
use crate::stream::TransactionFilter;
use crate::types::{QueueStats, Transaction, TransactionType};

//================================================================================================//
//                                 CATEGORIZED QUEUE MANAGER                                      //
//================================================================================================//

/// Fan-out router over per-category priority queues.
///
/// Cross-category operations (`next_transaction`, age eviction, clear-all)
/// hold an internal scan lock for their full duration, so each is atomic with
/// respect to the others; no cross-call ordering is guaranteed beyond that.
pub struct CategorizedQueueManager {
    queues: HashMap<TransactionType, Arc<PriorityQueue>>,
    filter: RwLock<Arc<dyn TransactionFilter>>,
    scan_lock: Mutex<()>,
}

impl CategorizedQueueManager {
    /// Builds one queue per category, all with the same capacity bound.
    pub fn new(config: QueueConfig, filter: Arc<dyn TransactionFilter>) -> Self {
        let queues = TransactionType::PRIORITY_ORDER
            .iter()
            .map(|&ty| (ty, Arc::new(PriorityQueue::new(config.clone()))))
            .collect();
        Self {
            queues,
            filter: RwLock::new(filter),
            scan_lock: Mutex::new(()),
        }
    }

    fn queue(&self, category: TransactionType) -> &PriorityQueue {
        // Every category is populated at construction.
        &self.queues[&category]
    }

    /// Runs the shared filter, classifies the transaction, and routes it into
    /// its category's queue. Returns the category it landed in.
    pub fn add_transaction(&self, tx: Transaction) -> Result<TransactionType, QueueError> {
        let filter = self.filter.read().expect("filter lock poisoned").clone();
        if !filter.should_process(&tx) {
            debug!(target: "queue_manager", hash = ?tx.hash, "Transaction filtered out");
            return Err(QueueError::FilteredOut);
        }
        let category = tx.transaction_type();
        self.queue(category).push(tx)?;
        Ok(category)
    }

    /// Pops the top transaction of the first non-empty category in fixed
    /// MEV-relevance order. Atomic with respect to other manager calls.
    pub fn next_transaction(&self) -> Result<Arc<Transaction>, QueueError> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        for ty in TransactionType::PRIORITY_ORDER {
            match self.queue(ty).pop() {
                Ok(tx) => return Ok(tx),
                Err(QueueError::Empty) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(QueueError::NoTransactionsAvailable)
    }

    /// Pops the top transaction of one category.
    pub fn get_transaction(&self, category: TransactionType) -> Result<Arc<Transaction>, QueueError> {
        self.queue(category)
            .pop()
            .map_err(|_| QueueError::CategoryEmpty(category))
    }

    /// Peeks at the top transaction of one category without removing it.
    pub fn peek_transaction(&self, category: TransactionType) -> Result<Arc<Transaction>, QueueError> {
        self.queue(category)
            .peek()
            .map_err(|_| QueueError::CategoryEmpty(category))
    }

    /// Evicts entries older than `max_age` from every category, returning the
    /// per-category eviction counts.
    pub fn evict_old_transactions(&self, max_age: Duration) -> HashMap<TransactionType, usize> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        // An age wider than the monotonic clock's span cannot be older than
        // any entry; nothing to evict.
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return HashMap::new();
        };
        let mut evicted = HashMap::new();
        for (&ty, queue) in &self.queues {
            let count = queue.evict_older_than(cutoff);
            if count > 0 {
                evicted.insert(ty, count);
            }
        }
        if !evicted.is_empty() {
            info!(target: "queue_manager", ?evicted, "Evicted aged transactions");
        }
        evicted
    }

    pub fn clear_queue(&self, category: TransactionType) {
        self.queue(category).clear();
    }

    pub fn clear_all_queues(&self) {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        for queue in self.queues.values() {
            queue.clear();
        }
    }

    pub fn update_filter(&self, filter: Arc<dyn TransactionFilter>) {
        *self.filter.write().expect("filter lock poisoned") = filter;
    }

    pub fn filter(&self) -> Arc<dyn TransactionFilter> {
        self.filter.read().expect("filter lock poisoned").clone()
    }

    pub fn queue_stats(&self, category: TransactionType) -> QueueStats {
        self.queue(category).stats()
    }

    pub fn all_queue_stats(&self) -> HashMap<TransactionType, QueueStats> {
        self.queues
            .iter()
            .map(|(&ty, queue)| (ty, queue.stats()))
            .collect()
    }

    pub fn queue_size(&self, category: TransactionType) -> usize {
        self.queue(category).size()
    }

    pub fn total_size(&self) -> usize {
        self.queues.values().map(|q| q.size()).sum()
    }
}

//================================================================================================//
//                                       QUEUE MANAGER                                            //
//================================================================================================//

/// Capacity/age bookkeeping against a single queue.
///
/// Age eviction requires the queue's [`AgeEvictable`] capability to be
/// registered at construction; without it, `evict_old_transactions` fails
/// explicitly rather than silently doing nothing.
pub struct QueueManager {
    queue: Arc<dyn TransactionQueue>,
    age_evictable: Option<Arc<dyn AgeEvictable>>,
}

impl QueueManager {
    pub fn new(queue: Arc<dyn TransactionQueue>) -> Self {
        Self { queue, age_evictable: None }
    }

    pub fn with_age_eviction(mut self, capability: Arc<dyn AgeEvictable>) -> Self {
        self.age_evictable = Some(capability);
        self
    }

    /// Mirrors the wrapped queue's current statistics.
    pub fn manage_capacity(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Evicts entries older than `max_age`, returning how many were removed.
    pub fn evict_old_transactions(&self, max_age: Duration) -> Result<usize, QueueError> {
        let capability = self
            .age_evictable
            .as_ref()
            .ok_or(QueueError::AgeEvictionUnsupported)?;
        match Instant::now().checked_sub(max_age) {
            Some(cutoff) => Ok(capability.evict_older_than(cutoff)),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::AllowAll;
    use ethers::core::types::{Address, Bytes, H256, U256};

    fn tx(id: u64, gas_price: u64, data: Vec<u8>) -> Transaction {
        Transaction {
            hash: H256::from_low_u64_be(id),
            from: Address::from_low_u64_be(1),
            to: Some(Address::from_low_u64_be(2)),
            value: U256::from(1_000u64),
            gas_price: U256::from(gas_price),
            gas_limit: U256::from(21_000u64),
            nonce: U256::zero(),
            data: Bytes::from(data),
            timestamp: Instant::now(),
            block_number: None,
            tx_index: None,
            chain_id: U256::from(8453u64),
        }
    }

    fn swap_tx(id: u64, gas_price: u64) -> Transaction {
        tx(id, gas_price, vec![0x7f, 0xf3, 0x6a, 0xb5])
    }

    fn transfer_tx(id: u64, gas_price: u64) -> Transaction {
        tx(id, gas_price, vec![])
    }

    fn manager() -> CategorizedQueueManager {
        CategorizedQueueManager::new(QueueConfig { capacity: 100 }, Arc::new(AllowAll))
    }

    struct RejectAll;
    impl TransactionFilter for RejectAll {
        fn should_process(&self, _tx: &Transaction) -> bool {
            false
        }
    }

    #[test]
    fn routes_by_category() {
        let m = manager();
        assert_eq!(m.add_transaction(swap_tx(1, 100)).unwrap(), TransactionType::Swap);
        assert_eq!(m.add_transaction(transfer_tx(2, 100)).unwrap(), TransactionType::Transfer);
        assert_eq!(m.queue_size(TransactionType::Swap), 1);
        assert_eq!(m.queue_size(TransactionType::Transfer), 1);
        assert_eq!(m.total_size(), 2);
    }

    #[test]
    fn swaps_drain_before_transfers_regardless_of_insertion_order() {
        let m = manager();
        m.add_transaction(transfer_tx(1, 9_999)).unwrap();
        m.add_transaction(swap_tx(2, 1)).unwrap();

        let first = m.next_transaction().unwrap();
        assert_eq!(first.hash, H256::from_low_u64_be(2));
        let second = m.next_transaction().unwrap();
        assert_eq!(second.hash, H256::from_low_u64_be(1));
        assert!(matches!(
            m.next_transaction(),
            Err(QueueError::NoTransactionsAvailable)
        ));
    }

    #[test]
    fn filtered_transactions_are_rejected() {
        let m = manager();
        m.update_filter(Arc::new(RejectAll));
        assert!(matches!(
            m.add_transaction(swap_tx(1, 100)),
            Err(QueueError::FilteredOut)
        ));
        assert_eq!(m.total_size(), 0);
    }

    #[test]
    fn per_category_pop_and_peek() {
        let m = manager();
        m.add_transaction(swap_tx(1, 100)).unwrap();

        let peeked = m.peek_transaction(TransactionType::Swap).unwrap();
        assert_eq!(peeked.hash, H256::from_low_u64_be(1));
        assert_eq!(m.queue_size(TransactionType::Swap), 1);

        let popped = m.get_transaction(TransactionType::Swap).unwrap();
        assert_eq!(popped.hash, H256::from_low_u64_be(1));
        assert!(matches!(
            m.get_transaction(TransactionType::Swap),
            Err(QueueError::CategoryEmpty(TransactionType::Swap))
        ));
        assert!(matches!(
            m.peek_transaction(TransactionType::Bridge),
            Err(QueueError::CategoryEmpty(TransactionType::Bridge))
        ));
    }

    #[test]
    fn age_eviction_aggregates_per_category() {
        let m = manager();
        let mut old_swap = swap_tx(1, 100);
        old_swap.timestamp = Instant::now() - Duration::from_secs(600);
        let mut old_transfer = transfer_tx(2, 100);
        old_transfer.timestamp = Instant::now() - Duration::from_secs(600);
        m.add_transaction(old_swap).unwrap();
        m.add_transaction(old_transfer).unwrap();
        m.add_transaction(swap_tx(3, 100)).unwrap();

        let evicted = m.evict_old_transactions(Duration::from_secs(300));
        assert_eq!(evicted.get(&TransactionType::Swap), Some(&1));
        assert_eq!(evicted.get(&TransactionType::Transfer), Some(&1));
        assert_eq!(m.total_size(), 1);
    }

    #[test]
    fn unbounded_age_evicts_nothing() {
        let m = manager();
        m.add_transaction(swap_tx(1, 100)).unwrap();
        let evicted = m.evict_old_transactions(Duration::from_secs(u64::MAX));
        assert!(evicted.is_empty());
        assert_eq!(m.total_size(), 1);
    }

    #[test]
    fn clear_operations() {
        let m = manager();
        m.add_transaction(swap_tx(1, 100)).unwrap();
        m.add_transaction(transfer_tx(2, 100)).unwrap();

        m.clear_queue(TransactionType::Swap);
        assert_eq!(m.queue_size(TransactionType::Swap), 0);
        assert_eq!(m.queue_size(TransactionType::Transfer), 1);

        m.add_transaction(swap_tx(3, 100)).unwrap();
        m.clear_all_queues();
        assert_eq!(m.total_size(), 0);

        // Cumulative counters survive the clears.
        let stats = m.all_queue_stats();
        assert_eq!(stats[&TransactionType::Swap].total_processed, 2);
    }

    #[test]
    fn queue_manager_mirrors_stats() {
        let q = Arc::new(PriorityQueue::new(QueueConfig { capacity: 10 }));
        q.push(tx(1, 100, vec![])).unwrap();
        let wrapper = QueueManager::new(q.clone()).with_age_eviction(q);
        let stats = wrapper.manage_capacity();
        assert_eq!(stats.current_size, 1);
        assert_eq!(stats.max_size, 10);
    }

    #[test]
    fn queue_manager_age_eviction_requires_capability() {
        let q = Arc::new(PriorityQueue::new(QueueConfig { capacity: 10 }));
        let without = QueueManager::new(q.clone());
        assert!(matches!(
            without.evict_old_transactions(Duration::from_secs(1)),
            Err(QueueError::AgeEvictionUnsupported)
        ));

        let mut aged = tx(1, 100, vec![]);
        aged.timestamp = Instant::now() - Duration::from_secs(600);
        q.push(aged).unwrap();
        let with = QueueManager::new(q.clone()).with_age_eviction(q);
        assert_eq!(with.evict_old_transactions(Duration::from_secs(300)).unwrap(), 1);
    }

    #[test]
    fn queue_manager_unbounded_age_evicts_nothing() {
        let q = Arc::new(PriorityQueue::new(QueueConfig { capacity: 10 }));
        q.push(tx(1, 100, vec![])).unwrap();
        let wrapper = QueueManager::new(q.clone()).with_age_eviction(q.clone());
        assert_eq!(
            wrapper.evict_old_transactions(Duration::from_secs(u64::MAX)).unwrap(),
            0
        );
        assert_eq!(q.size(), 1);
    }
}
