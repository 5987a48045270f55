// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Transaction queue feeding block proposals.

use consensus_traits::{PoolTransaction, TransactionPool};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{Transaction, TxnId};

/// FIFO queue of client transactions, deduplicated by id.
///
/// Proposals read from the queue without removing; transactions leave the
/// queue only once committed.
#[derive(Clone, Debug, Default)]
pub struct Mempool {
    queue: BTreeMap<u64, Transaction>,
    index: HashMap<TxnId, u64>,
    next_seq: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TxnId) -> bool {
        self.index.contains_key(id)
    }
}

impl TransactionPool for Mempool {
    type Transaction = Transaction;

    fn submit(&mut self, txn: Transaction) -> bool {
        if self.index.contains_key(&txn.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(txn.id.clone(), seq);
        self.queue.insert(seq, txn);
        true
    }

    fn take(&self, max: usize, exclude: &HashSet<TxnId>) -> Vec<Transaction> {
        self.queue
            .values()
            .filter(|txn| !exclude.contains(txn.id()))
            .take(max)
            .cloned()
            .collect()
    }

    fn remove(&mut self, ids: &[TxnId]) -> Vec<Transaction> {
        ids.iter()
            .filter_map(|id| self.index.remove(id))
            .filter_map(|seq| self.queue.remove(&seq))
            .collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: &str) -> Transaction {
        Transaction::new(id, "client", format!("cmd-{}", id))
    }

    #[test]
    fn test_take_is_fifo_and_bounded() {
        let mut pool = Mempool::new();
        for id in ["a", "b", "c", "d"] {
            assert!(pool.submit(txn(id)));
        }
        let taken: Vec<_> = pool.take(3, &HashSet::new()).into_iter().map(|t| t.id).collect();
        assert_eq!(taken, vec!["a", "b", "c"]);
        // Taking does not dequeue
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_take_skips_excluded() {
        let mut pool = Mempool::new();
        for id in ["a", "b", "c"] {
            pool.submit(txn(id));
        }
        let exclude: HashSet<TxnId> = ["a".to_string()].into_iter().collect();
        let taken: Vec<_> = pool.take(5, &exclude).into_iter().map(|t| t.id).collect();
        assert_eq!(taken, vec!["b", "c"]);
    }

    #[test]
    fn test_duplicate_submit_rejected() {
        let mut pool = Mempool::new();
        assert!(pool.submit(txn("a")));
        assert!(!pool.submit(txn("a")));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_committed() {
        let mut pool = Mempool::new();
        for id in ["a", "b", "c"] {
            pool.submit(txn(id));
        }
        let removed = pool.remove(&["b".to_string(), "zz".to_string()]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "b");
        assert!(!pool.contains(&"b".to_string()));
        assert_eq!(pool.len(), 2);
    }
}
