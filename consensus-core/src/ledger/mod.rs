// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Committed chain and speculative execution results.
//!
//! Execution is modelled as a digest chain: the state after a block is the
//! digest of its parent's state and its payload. Every replica computes the
//! same state for the same block, which is what vote aggregation requires.

mod commit_log;

pub use commit_log::{FileLedgerLog, NoopLedgerLog};

use crate::block::{Block, CommittedBlock};
use crate::block_tree::PendingBlockTree;
use crate::crypto::{CanonicalWriter, Domain};
use crate::error::ConsensusError;
use crate::types::{Round, Transaction, TxnId, NIL_ROUND};
use consensus_traits::{CommitLog, HashValue};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// State of the empty ledger.
pub const GENESIS_STATE: HashValue = HashValue::zero();

/// A block cannot be executed on this replica.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Block {block_id} extends unknown parent {parent_id}")]
    UnknownParent {
        block_id: HashValue,
        parent_id: HashValue,
    },
}

pub struct Ledger {
    committed: Vec<CommittedBlock>,
    committed_index: HashMap<HashValue, usize>,
    /// Speculative state keyed by block id, for blocks not yet committed.
    speculative_states: HashMap<HashValue, HashValue>,
    log: Box<dyn CommitLog>,
}

impl Ledger {
    pub fn new(log: Box<dyn CommitLog>) -> Self {
        Self {
            committed: Vec::new(),
            committed_index: HashMap::new(),
            speculative_states: HashMap::new(),
            log,
        }
    }

    /// A ledger that keeps committed blocks in memory only.
    pub fn in_memory() -> Self {
        Self::new(Box::new(NoopLedgerLog))
    }

    /// State after applying `txns` on top of `parent_state`.
    pub fn compute_state(parent_state: &HashValue, txns: &[Transaction]) -> HashValue {
        let mut writer = CanonicalWriter::new(Domain::SpeculativeState);
        writer.hash(parent_state).len_prefix(txns.len());
        for txn in txns {
            writer.str(&txn.command);
        }
        writer.digest()
    }

    /// Record the speculative state of `block_id` executed on its parent.
    ///
    /// A block without a parent executes on [`GENESIS_STATE`]. A parent this
    /// ledger holds no state for is an error: the replica missed a block and
    /// cannot compute the state its peers vote on.
    pub fn speculate(
        &mut self,
        parent_id: Option<HashValue>,
        block_id: HashValue,
        txns: &[Transaction],
    ) -> Result<HashValue, ExecutionError> {
        if let Some(state) = self.state_of(&block_id) {
            return Ok(state);
        }
        let parent_state = match parent_id {
            None => GENESIS_STATE,
            Some(parent_id) => self
                .state_of(&parent_id)
                .ok_or(ExecutionError::UnknownParent {
                    block_id,
                    parent_id,
                })?,
        };
        let state = Self::compute_state(&parent_state, txns);
        self.speculative_states.insert(block_id, state);
        Ok(state)
    }

    /// Speculative state of an uncommitted block.
    pub fn pending_state(&self, block_id: &HashValue) -> Option<HashValue> {
        self.speculative_states.get(block_id).copied()
    }

    pub fn committed_state(&self, block_id: &HashValue) -> Option<HashValue> {
        self.get_committed_block(block_id)
            .map(|committed| committed.commit_state_id)
    }

    /// Speculative or committed state of a block.
    pub fn state_of(&self, block_id: &HashValue) -> Option<HashValue> {
        self.pending_state(block_id)
            .or_else(|| self.committed_state(block_id))
    }

    /// Append a pending block to the committed chain.
    ///
    /// The block's commands reach the commit log before the in-memory chain
    /// changes. Committing an already committed block is a no-op. Returns the
    /// ids of the committed transactions.
    pub fn commit(
        &mut self,
        block_id: HashValue,
        pending: &PendingBlockTree,
    ) -> Result<Vec<TxnId>, ConsensusError> {
        if self.is_committed(&block_id) {
            return Ok(Vec::new());
        }
        let block = pending
            .find(&block_id)
            .ok_or_else(|| ConsensusError::missing_block(block_id))?;
        let commit_state_id = match self.pending_state(&block_id) {
            Some(state) => state,
            None => {
                let parent_state = match block.parent_id() {
                    None => GENESIS_STATE,
                    Some(parent_id) => self
                        .state_of(&parent_id)
                        .ok_or_else(|| ConsensusError::missing_block(parent_id))?,
                };
                Self::compute_state(&parent_state, block.payload())
            },
        };

        let commands: Vec<&str> = block
            .payload()
            .iter()
            .map(|txn| txn.command.as_str())
            .collect();
        self.log.append(&commands)?;

        let txn_ids = block.payload().iter().map(|txn| txn.id.clone()).collect();
        self.speculative_states.remove(&block_id);
        self.committed_index.insert(block_id, self.committed.len());
        self.committed.push(CommittedBlock {
            block: block.clone(),
            commit_state_id,
        });
        Ok(txn_ids)
    }

    pub fn get_committed_block(&self, block_id: &HashValue) -> Option<&CommittedBlock> {
        self.committed_index
            .get(block_id)
            .and_then(|index| self.committed.get(*index))
    }

    pub fn is_committed(&self, block_id: &HashValue) -> bool {
        self.committed_index.contains_key(block_id)
    }

    /// Committed blocks in commit order.
    pub fn committed_blocks(&self) -> &[CommittedBlock] {
        &self.committed
    }

    pub fn committed_rounds(&self) -> Vec<Round> {
        self.committed.iter().map(|c| c.block.round()).collect()
    }

    pub fn last_committed(&self) -> Option<&CommittedBlock> {
        self.committed.last()
    }

    pub fn last_committed_round(&self) -> Round {
        self.last_committed()
            .map_or(NIL_ROUND, |committed| committed.block.round())
    }

    /// Forget the speculative states of pruned blocks.
    pub fn discard_speculative(&mut self, block_ids: &[HashValue]) {
        for block_id in block_ids {
            self.speculative_states.remove(block_id);
        }
    }

    /// Find a block by id among committed blocks.
    pub fn committed_block(&self, block_id: &HashValue) -> Option<&Block> {
        self.get_committed_block(block_id)
            .map(|committed| &committed.block)
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("committed", &self.committed.len())
            .field("speculative", &self.speculative_states.len())
            .field("last_committed_round", &self.last_committed_round())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_traits::ReplicaId;

    fn block(round: Round, command: &str) -> Block {
        Block::new(
            ReplicaId(0),
            round,
            vec![Transaction::new(format!("t{}", round), "c", command)],
            None,
        )
    }

    #[test]
    fn test_speculative_state_chains_on_parent() {
        let mut ledger = Ledger::in_memory();
        let a = block(0, "x");
        let b = block(1, "y");

        let state_a = ledger.speculate(None, a.id(), a.payload()).unwrap();
        let state_b = ledger.speculate(Some(a.id()), b.id(), b.payload()).unwrap();
        assert_eq!(state_a, Ledger::compute_state(&GENESIS_STATE, a.payload()));
        assert_eq!(state_b, Ledger::compute_state(&state_a, b.payload()));

        // Deterministic and idempotent
        assert_eq!(
            ledger.speculate(Some(a.id()), b.id(), b.payload()),
            Ok(state_b)
        );
        assert_eq!(ledger.pending_state(&b.id()), Some(state_b));
    }

    #[test]
    fn test_speculate_on_unknown_parent_fails() {
        let mut ledger = Ledger::in_memory();
        let a = block(0, "x");
        let b = block(1, "y");

        assert_eq!(
            ledger.speculate(Some(a.id()), b.id(), b.payload()),
            Err(ExecutionError::UnknownParent {
                block_id: b.id(),
                parent_id: a.id(),
            })
        );
        assert_eq!(ledger.pending_state(&b.id()), None);
    }

    #[test]
    fn test_commit_missing_block_reports_error() {
        let mut ledger = Ledger::in_memory();
        let pending = PendingBlockTree::default();
        let missing = HashValue::digest(b"missing");
        assert!(matches!(
            ledger.commit(missing, &pending),
            Err(ConsensusError::MissingBlock { block_id }) if block_id == missing
        ));
    }

    #[test]
    fn test_commit_moves_state_and_is_idempotent() {
        let mut ledger = Ledger::in_memory();
        let mut pending = PendingBlockTree::default();
        let a = block(0, "x");
        let state = ledger.speculate(None, a.id(), a.payload()).unwrap();
        pending.add(a.clone());

        assert_eq!(ledger.commit(a.id(), &pending).unwrap(), vec!["t0".to_string()]);
        assert!(ledger.is_committed(&a.id()));
        assert_eq!(ledger.pending_state(&a.id()), None);
        assert_eq!(ledger.committed_state(&a.id()), Some(state));
        assert_eq!(ledger.committed_rounds(), vec![0]);

        assert!(ledger.commit(a.id(), &pending).unwrap().is_empty());
        assert_eq!(ledger.committed_blocks().len(), 1);
    }

    #[test]
    fn test_commit_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        let mut ledger = Ledger::new(Box::new(FileLedgerLog::open(&path).unwrap()));
        let mut pending = PendingBlockTree::default();
        let a = block(0, "put k v");
        ledger.speculate(None, a.id(), a.payload()).unwrap();
        pending.add(a.clone());

        ledger.commit(a.id(), &pending).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "put k v\n");
    }
}
