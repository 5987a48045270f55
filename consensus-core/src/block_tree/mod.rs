// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Block tree: pending blocks, certificates and vote aggregation.
//!
//! The block tree owns the [`Ledger`]. Processing a certificate whose vote
//! carries a commit state commits the grandparent of the certified block,
//! together with any uncommitted ancestors, then prunes the pending tree.
//! A replica that missed one of those blocks skips the commit and keeps
//! following certificates.

mod pending_block_tree;

pub use pending_block_tree::PendingBlockTree;

use crate::block::Block;
use crate::error::ConsensusError;
use crate::ledger::{ExecutionError, Ledger};
use crate::quorum_cert::{qc_round, QuorumCert};
use crate::types::{Round, Transaction, TxnId};
use crate::votes::{PendingVotes, VoteMsg, VoteReceptionResult};
use consensus_traits::{HashValue, ReplicaId, ValidatorSigner};
use log::{debug, error, info};
use std::collections::HashSet;
use std::sync::Arc;

pub struct BlockTree {
    author: ReplicaId,
    pending_block_tree: PendingBlockTree,
    pending_votes: PendingVotes,
    high_qc: Option<QuorumCert>,
    high_commit_qc: Option<QuorumCert>,
    ledger: Ledger,
    signer: Arc<dyn ValidatorSigner>,
}

impl BlockTree {
    pub fn new(ledger: Ledger, signer: Arc<dyn ValidatorSigner>, quorum_size: usize) -> Self {
        Self {
            author: signer.author(),
            pending_block_tree: PendingBlockTree::new(),
            pending_votes: PendingVotes::new(quorum_size),
            high_qc: None,
            high_commit_qc: None,
            ledger,
            signer,
        }
    }

    pub fn high_qc(&self) -> Option<&QuorumCert> {
        self.high_qc.as_ref()
    }

    pub fn high_qc_round(&self) -> Round {
        qc_round(self.high_qc.as_ref())
    }

    pub fn high_commit_qc(&self) -> Option<&QuorumCert> {
        self.high_commit_qc.as_ref()
    }

    pub fn high_commit_qc_round(&self) -> Round {
        qc_round(self.high_commit_qc.as_ref())
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pending_block_tree(&self) -> &PendingBlockTree {
        &self.pending_block_tree
    }

    /// Find a block among pending and committed blocks.
    pub fn find_block(&self, block_id: &HashValue) -> Option<&Block> {
        self.pending_block_tree
            .find(block_id)
            .or_else(|| self.ledger.committed_block(block_id))
    }

    /// Process a verified certificate.
    ///
    /// Commits when the certificate carries a commit state and is newer than
    /// the current commit certificate, then raises `high_qc` if the
    /// certificate is newer. A commit whose blocks are not all held locally
    /// is skipped and `high_commit_qc` stays put, so a later certificate
    /// retries it. Returns the ids of committed transactions.
    pub fn process_qc(
        &mut self,
        qc: Option<&QuorumCert>,
    ) -> Result<Vec<TxnId>, ConsensusError> {
        let Some(qc) = qc else {
            return Ok(Vec::new());
        };

        let mut committed_txns = Vec::new();
        if qc.commit_state_id().is_some() && qc.round() > self.high_commit_qc_round() {
            match self.commit_chain(qc) {
                Ok(chain) => committed_txns = self.commit(qc, chain)?,
                Err(missing) => error!(
                    "[replica {}] Skipping commit of {}: block {} is missing",
                    self.author,
                    qc,
                    missing.short_str()
                ),
            }
        }

        if qc.round() > self.high_qc_round() {
            debug!("[replica {}] New high {}", self.author, qc);
            self.high_qc = Some(qc.clone());
            self.pending_votes.prune_up_to(qc.round());
        }
        Ok(committed_txns)
    }

    /// Commit `chain`, oldest first, and prune the pending tree below it.
    fn commit(
        &mut self,
        qc: &QuorumCert,
        chain: Vec<HashValue>,
    ) -> Result<Vec<TxnId>, ConsensusError> {
        let mut committed_txns = Vec::new();
        let Some(target) = chain.last().copied() else {
            self.high_commit_qc = Some(qc.clone());
            return Ok(committed_txns);
        };
        for block_id in chain {
                committed_txns.extend(self.ledger.commit(block_id, &self.pending_block_tree)?);
                if let Some(committed) = self.ledger.get_committed_block(&block_id) {
                    info!(
                        "[replica {}] Committed {} with state {}",
                        self.author,
                        committed.block,
                        committed.commit_state_id.short_str()
                    );
                }
            }
        let target_round = self.ledger.last_committed_round();
        let removed = self.pending_block_tree.prune(target, target_round);
        self.ledger.discard_speculative(&removed);
        debug!(
            "[replica {}] Pruned {} pending blocks below round {}",
            self.author,
            removed.len(),
            target_round
        );
        self.high_commit_qc = Some(qc.clone());
        Ok(committed_txns)
    }

    /// Blocks committed by `qc`, oldest first: the grandparent of the
    /// certified block and its uncommitted ancestors. Fails with the id of
    /// the first block this replica does not hold.
    fn commit_chain(&self, qc: &QuorumCert) -> Result<Vec<HashValue>, HashValue> {
        let target = self.commit_target(qc)?;
        let mut chain = Vec::new();
        let mut cursor = Some(target);
        while let Some(block_id) = cursor {
            if self.ledger.is_committed(&block_id) {
                break;
            }
            let block = self.pending_block_tree.find(&block_id).ok_or(block_id)?;
            chain.push(block_id);
            cursor = block.parent_id();
        }
        chain.reverse();
        Ok(chain)
    }

    fn commit_target(&self, qc: &QuorumCert) -> Result<HashValue, HashValue> {
        if let Some(grandparent) = self
            .find_block(&qc.certified_block_id())
            .and_then(Block::qc)
            .and_then(QuorumCert::parent_id)
        {
            return Ok(grandparent);
        }
        let parent_id = qc.parent_id().ok_or(qc.certified_block_id())?;
        self.find_block(&parent_id)
            .ok_or(parent_id)?
            .parent_id()
            .ok_or(parent_id)
    }

    /// Speculatively execute a block and add it to the pending tree.
    ///
    /// A block whose parent this replica never executed is not inserted.
    pub fn execute_and_insert(&mut self, block: Block) -> Result<HashValue, ExecutionError> {
        let state = self
            .ledger
            .speculate(block.parent_id(), block.id(), block.payload())?;
        if !self.ledger.is_committed(&block.id()) {
            self.pending_block_tree.add(block);
        }
        Ok(state)
    }

    /// Process a verified vote.
    ///
    /// The vote's commit certificate is processed first. A vote that brings
    /// its bucket to 2f+1 yields a new certificate signed by this replica as
    /// aggregator.
    pub fn process_vote(
        &mut self,
        vote: &VoteMsg,
    ) -> Result<(Option<QuorumCert>, Vec<TxnId>), ConsensusError> {
        let committed_txns = self.process_qc(vote.high_commit_qc.as_ref())?;
        if vote.round() <= self.high_qc_round() {
            debug!(
                "[replica {}] Ignoring vote for certified round {} from {}",
                self.author,
                vote.round(),
                vote.sender
            );
            return Ok((None, committed_txns));
        }

        match self.pending_votes.insert_vote(vote) {
            VoteReceptionResult::QuorumReached(votes) => {
                let qc = QuorumCert::new(
                    votes.vote_info,
                    votes.ledger_commit_info,
                    votes.signatures,
                    self.signer.as_ref(),
                );
                info!("[replica {}] Formed {}", self.author, qc);
                Ok((Some(qc), committed_txns))
            },
            VoteReceptionResult::Accepted { count } => {
                debug!(
                    "[replica {}] {} votes for round {} block {}",
                    self.author,
                    count,
                    vote.round(),
                    vote.vote_info.id.short_str()
                );
                Ok((None, committed_txns))
            },
            VoteReceptionResult::Duplicate => Ok((None, committed_txns)),
        }
    }

    /// New block for `round` extending `high_qc`.
    pub fn generate_block(&self, txns: Vec<Transaction>, round: Round) -> Block {
        Block::new(self.author, round, txns, self.high_qc.clone())
    }

    /// Ids of transactions in pending blocks, excluded from new proposals.
    pub fn pending_transaction_ids(&self) -> HashSet<TxnId> {
        self.pending_block_tree
            .blocks()
            .flat_map(|block| block.payload().iter().map(|txn| txn.id.clone()))
            .collect()
    }

    /// True if `block` or the block its certificate certifies carries a
    /// payload.
    pub fn has_payload_or_certified_payload(&self, block: &Block) -> bool {
        if !block.is_empty() {
            return true;
        }
        block
            .parent_id()
            .and_then(|parent_id| self.find_block(&parent_id))
            .map_or(false, |parent| !parent.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChain;
    use crate::types::NIL_ROUND;

    #[test]
    fn test_generate_block_extends_high_qc() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let qc0 = chain.certify(&b0);
        let tree = chain.block_tree_mut();
        tree.process_qc(Some(&qc0)).unwrap();

        let b1 = tree.generate_block(Vec::new(), 1);
        assert_eq!(b1.parent_id(), Some(b0.id()));
        assert_eq!(b1.qc_round(), 0);
    }

    #[test]
    fn test_high_qc_is_monotonic() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let qc0 = chain.certify(&b0);
        let b1 = chain.propose(1, &["b"]);
        let qc1 = chain.certify(&b1);

        let tree = chain.block_tree_mut();
        tree.process_qc(Some(&qc1)).unwrap();
        tree.process_qc(Some(&qc0)).unwrap();
        assert_eq!(tree.high_qc_round(), 1);
    }

    #[test]
    fn test_three_chain_commits_grandparent() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);
        let b2 = chain.propose(2, &["c"]);
        let qc2 = chain.certify(&b2);
        assert!(qc2.commit_state_id().is_some());

        let tree = chain.block_tree_mut();
        let committed = tree.process_qc(Some(&qc2)).unwrap();
        assert_eq!(committed, vec!["t-a".to_string()]);
        assert!(tree.ledger().is_committed(&b0.id()));
        assert!(!tree.ledger().is_committed(&b1.id()));
        assert_eq!(tree.high_commit_qc_round(), 2);
    }

    #[test]
    fn test_commit_includes_uncommitted_ancestors() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);
        let b3 = chain.propose(3, &["c"]);
        let b4 = chain.propose(4, &["d"]);
        let b5 = chain.propose(5, &["e"]);
        let qc5 = chain.certify(&b5);

        let tree = chain.block_tree_mut();
        tree.process_qc(Some(&qc5)).unwrap();
        let rounds = tree.ledger().committed_rounds();
        assert_eq!(rounds, vec![0, 1, 3]);
        assert!(tree.ledger().is_committed(&b0.id()));
        assert!(tree.ledger().is_committed(&b1.id()));
        assert!(tree.ledger().is_committed(&b3.id()));
        assert!(!tree.ledger().is_committed(&b4.id()));
    }

    #[test]
    fn test_non_consecutive_certificate_does_not_commit() {
        let mut chain = TestChain::new(4);
        chain.propose(0, &["a"]);
        chain.propose(1, &["b"]);
        let b3 = chain.propose(3, &["c"]);
        let qc3 = chain.certify(&b3);
        assert!(qc3.commit_state_id().is_none());

        let tree = chain.block_tree_mut();
        assert!(tree.process_qc(Some(&qc3)).unwrap().is_empty());
        assert!(tree.ledger().committed_blocks().is_empty());
    }

    #[test]
    fn test_commit_with_missing_block_is_skipped() {
        let mut chain = TestChain::new(4);
        chain.propose(0, &["a"]);
        chain.propose(1, &["b"]);
        let b2 = chain.propose(2, &["c"]);
        let qc2 = chain.certify(&b2);

        let mut fresh = TestChain::new(4);
        let tree = fresh.block_tree_mut();
        assert!(tree.process_qc(Some(&qc2)).unwrap().is_empty());
        assert!(tree.ledger().committed_blocks().is_empty());
        assert_eq!(tree.high_commit_qc_round(), NIL_ROUND);
        assert_eq!(tree.high_qc_round(), 2);
    }

    #[test]
    fn test_commit_skips_until_gap_is_filled() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);
        let b2 = chain.propose(2, &["c"]);
        let b3 = chain.propose(3, &["d"]);
        let qc3 = chain.certify(&b3);

        // A replica that holds every block except b1
        let mut lagging = TestChain::new(4);
        let tree = lagging.block_tree_mut();
        tree.execute_and_insert(b0.clone()).unwrap();
        assert_eq!(
            tree.execute_and_insert(b2.clone()),
            Err(ExecutionError::UnknownParent {
                block_id: b2.id(),
                parent_id: b1.id(),
            })
        );
        assert!(!tree.pending_block_tree().contains(&b2.id()));

        assert!(tree.process_qc(Some(&qc3)).unwrap().is_empty());
        assert!(tree.ledger().committed_blocks().is_empty());

        tree.execute_and_insert(b1.clone()).unwrap();
        tree.execute_and_insert(b2.clone()).unwrap();
        tree.execute_and_insert(b3).unwrap();
        let committed = tree.process_qc(Some(&qc3)).unwrap();
        assert_eq!(committed, vec!["t-a".to_string(), "t-b".to_string()]);
        assert_eq!(tree.ledger().committed_rounds(), vec![0, 1]);
        assert_eq!(tree.high_commit_qc_round(), 3);
    }

    #[test]
    fn test_prune_drops_forks() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);
        // A fork off b0 that lost round 2
        let fork = chain.fork(2, &b0, &["x"]);
        let b3 = chain.propose(3, &["c"]);
        let b4 = chain.propose(4, &["d"]);
        let b5 = chain.propose(5, &["e"]);
        let qc5 = chain.certify(&b5);

        let tree = chain.block_tree_mut();
        tree.process_qc(Some(&qc5)).unwrap();
        let pending = tree.pending_block_tree();
        assert!(!pending.contains(&fork.id()));
        assert!(!pending.contains(&b0.id()));
        assert!(!pending.contains(&b1.id()));
        assert!(pending.contains(&b3.id()));
        assert!(pending.contains(&b4.id()));
        assert!(pending.contains(&b5.id()));
    }

    #[test]
    fn test_payload_rule_looks_at_certified_block_only() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &[]);
        let b2 = chain.propose(2, &[]);
        let b3 = chain.propose(3, &["b"]);

        let tree = chain.block_tree_mut();
        assert!(tree.has_payload_or_certified_payload(&b0));
        assert!(tree.has_payload_or_certified_payload(&b1));
        assert!(!tree.has_payload_or_certified_payload(&b2));
        assert!(tree.has_payload_or_certified_payload(&b3));
    }

    #[test]
    fn test_vote_aggregation_forms_qc() {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let votes = chain.votes_for(&b0);

        let tree = chain.block_tree_mut();
        let (first, _) = tree.process_vote(&votes[0]).unwrap();
        let (second, _) = tree.process_vote(&votes[1]).unwrap();
        let (duplicate, _) = tree.process_vote(&votes[1]).unwrap();
        assert!(first.is_none() && second.is_none() && duplicate.is_none());

        let (qc, _) = tree.process_vote(&votes[2]).unwrap();
        let qc = qc.expect("third vote forms the certificate");
        assert_eq!(qc.certified_block_id(), b0.id());
        assert_eq!(qc.signatures.len(), 3);
    }
}
