// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Transaction source boundary.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// A transaction that can be queued and referenced by id.
pub trait PoolTransaction: Clone + Debug + Send + Sync {
    type Id: Clone + Eq + Hash + Debug + Send + Sync;

    fn id(&self) -> &Self::Id;
}

/// FIFO source of transactions for block proposals.
pub trait TransactionPool: Send {
    type Transaction: PoolTransaction;

    /// Queue a transaction. Returns false if its id is already queued.
    fn submit(&mut self, txn: Self::Transaction) -> bool;

    /// Take up to `max` queued transactions in arrival order, skipping ids in
    /// `exclude`. The transactions stay queued until removed.
    fn take(
        &self,
        max: usize,
        exclude: &HashSet<<Self::Transaction as PoolTransaction>::Id>,
    ) -> Vec<Self::Transaction>;

    /// Remove committed transactions, returning the ones that were queued.
    fn remove(
        &mut self,
        ids: &[<Self::Transaction as PoolTransaction>::Id],
    ) -> Vec<Self::Transaction>;

    /// Number of queued transactions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
