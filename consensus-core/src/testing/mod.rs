// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Testing utilities for consensus-core.
//!
//! - [`TestChain`] builds certified chains of blocks by hand, signing with
//!   deterministic keys, for exercising one component at a time.
//! - [`TestCluster`] wires several [`RoundManager`]s together through an
//!   in-memory message queue that tests deliver step by step.

use consensus_traits::{
    ReplicaId, SafetyStorage, TransactionPool, ValidatorSigner, ValidatorVerifier,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::block::Block;
use crate::block_tree::BlockTree;
use crate::config::ConsensusConfig;
use crate::crypto::ValidatorSet;
use crate::error::ConsensusError;
use crate::ledger::Ledger;
use crate::liveness::{LeaderElection, LeaderElectionConfig, PacemakerConfig, RoundRobinProposer};
use crate::mempool::Mempool;
use crate::quorum_cert::QuorumCert;
use crate::round_manager::RoundManager;
use crate::runtime::{ConsensusMessage, Outbound};
use crate::safety_rules::{build_vote_data, InMemorySafetyStorage, SafetyRules, SafetyStateData};
use crate::timeout::{TimeoutCertificate, TimeoutInfo, TimeoutMsg};
use crate::types::{Round, Transaction};
use crate::votes::VoteMsg;

/// Seed of the deterministic test keys.
pub const TEST_KEY_SEED: u64 = 7;

/// `count` transactions with ids `txn-0`, `txn-1`, ...
pub fn make_transactions(count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| Transaction::new(format!("txn-{}", i), "client-0", format!("cmd-{}", i)))
        .collect()
}

/// Deterministic signers and the matching validator set.
pub fn make_validators(n: usize) -> (Arc<ValidatorSet>, Vec<Arc<dyn ValidatorSigner>>) {
    let (validators, signers) = ValidatorSet::generate(n, TEST_KEY_SEED);
    let signers = signers
        .into_iter()
        .map(|signer| Arc::new(signer) as Arc<dyn ValidatorSigner>)
        .collect();
    (Arc::new(validators), signers)
}

/// Hand-built chain of blocks seen through the block tree of replica 0.
///
/// `propose` extends the most recently proposed block with a certificate
/// signed by the first 2f+1 replicas; the author is the round-robin leader
/// of the block's round. Transactions are named `t-<command>`.
pub struct TestChain {
    validators: Arc<ValidatorSet>,
    signers: Vec<Arc<dyn ValidatorSigner>>,
    block_tree: BlockTree,
    proposer: RoundRobinProposer,
    blocks: BTreeMap<Round, Block>,
    certificates: HashMap<consensus_traits::HashValue, QuorumCert>,
    tip: Option<Block>,
}

impl TestChain {
    pub fn new(n: usize) -> Self {
        let (validators, signers) = make_validators(n);
        let quorum_size = validators.quorum_size();
        let block_tree = BlockTree::new(Ledger::in_memory(), signers[0].clone(), quorum_size);
        Self {
            validators,
            signers,
            block_tree,
            proposer: RoundRobinProposer::new(n),
            blocks: BTreeMap::new(),
            certificates: HashMap::new(),
            tip: None,
        }
    }

    pub fn signer(&self, index: usize) -> Arc<dyn ValidatorSigner> {
        self.signers[index].clone()
    }

    pub fn validators(&self) -> Arc<ValidatorSet> {
        self.validators.clone()
    }

    pub fn block_tree(&self) -> &BlockTree {
        &self.block_tree
    }

    pub fn block_tree_mut(&mut self) -> &mut BlockTree {
        &mut self.block_tree
    }

    /// The block proposed for `round`.
    pub fn block_at(&self, round: Round) -> &Block {
        &self.blocks[&round]
    }

    fn transactions(commands: &[&str]) -> Vec<Transaction> {
        commands
            .iter()
            .map(|command| Transaction::new(format!("t-{}", command), "client", *command))
            .collect()
    }

    /// Propose a block for `round` extending the previously proposed block.
    pub fn propose(&mut self, round: Round, commands: &[&str]) -> Block {
        let qc = self.tip.clone().map(|tip| self.certify(&tip));
        let block = self.insert(round, commands, qc);
        self.tip = Some(block.clone());
        block
    }

    /// Propose a block for `round` on `parent` without moving the tip.
    pub fn fork(&mut self, round: Round, parent: &Block, commands: &[&str]) -> Block {
        let qc = self.certify(parent);
        self.insert(round, commands, Some(qc))
    }

    fn insert(&mut self, round: Round, commands: &[&str], qc: Option<QuorumCert>) -> Block {
        let author = self.proposer.get_leader(round);
        let block = Block::new(author, round, Self::transactions(commands), qc);
        self.block_tree
            .execute_and_insert(block.clone())
            .expect("test chains extend executed blocks");
        self.blocks.insert(round, block.clone());
        block
    }

    /// Votes of every replica for `block`.
    pub fn votes_for(&self, block: &Block) -> Vec<VoteMsg> {
        let (vote_info, ledger_commit_info) =
            build_vote_data(block, self.block_tree.ledger()).expect("block was executed");
        self.signers
            .iter()
            .map(|signer| {
                VoteMsg::new(
                    vote_info.clone(),
                    ledger_commit_info.clone(),
                    None,
                    signer.as_ref(),
                )
            })
            .collect()
    }

    /// Certificate on `block` from the first 2f+1 replicas.
    pub fn certify(&mut self, block: &Block) -> QuorumCert {
        if let Some(qc) = self.certificates.get(&block.id()) {
            return qc.clone();
        }
        let quorum_size = self.validators.quorum_size();
        let votes = self.votes_for(block);
        let signatures = votes
            .iter()
            .take(quorum_size)
            .map(|vote| (vote.sender, vote.signature.clone()))
            .collect();
        let vote = &votes[0];
        let qc = QuorumCert::new(
            vote.vote_info.clone(),
            vote.ledger_commit_info.clone(),
            signatures,
            self.signers[block.author().index()].as_ref(),
        );
        self.certificates.insert(block.id(), qc.clone());
        qc
    }

    /// Timeout certificate for `round` signed by the first
    /// `high_qc_rounds.len()` replicas, each reporting its entry.
    pub fn timeout_certificate(
        &self,
        round: Round,
        high_qc_rounds: &[Round],
    ) -> TimeoutCertificate {
        let tmo_signatures = high_qc_rounds
            .iter()
            .zip(&self.signers)
            .map(|(high_qc_round, signer)| {
                (
                    signer.author(),
                    signer.sign(&TimeoutInfo::signing_bytes(round, *high_qc_round)),
                )
            })
            .collect();
        TimeoutCertificate {
            round,
            tmo_high_qc_rounds: high_qc_rounds.to_vec(),
            tmo_signatures,
        }
    }

    pub fn timeout_msg(
        &self,
        sender: usize,
        round: Round,
        high_qc: Option<&QuorumCert>,
    ) -> TimeoutMsg {
        let signer = self.signers[sender].as_ref();
        let tmo_info = TimeoutInfo::new(round, high_qc.cloned(), signer);
        TimeoutMsg::new(tmo_info, None, None)
    }

    pub fn safety_rules(&self, index: usize) -> SafetyRules {
        self.safety_rules_with_storage(index, Box::new(InMemorySafetyStorage::new()))
    }

    pub fn safety_rules_with_storage(
        &self,
        index: usize,
        storage: Box<dyn SafetyStorage<SafetyStateData>>,
    ) -> SafetyRules {
        SafetyRules::new(self.signer(index), self.validators.clone(), storage)
    }

    pub fn leader_election(&self) -> LeaderElection {
        LeaderElection::new(LeaderElectionConfig::new(self.signers.len()))
    }
}

/// Several in-memory replicas exchanging messages through a queue.
///
/// Nothing is delivered until a test asks for it, so message order and loss
/// are fully under the test's control.
pub struct TestCluster {
    replicas: Vec<RoundManager>,
    signers: Vec<Arc<dyn ValidatorSigner>>,
    storages: Vec<InMemorySafetyStorage>,
    inbox: VecDeque<(ReplicaId, ConsensusMessage)>,
    crashed: HashSet<ReplicaId>,
}

impl TestCluster {
    pub fn new(n: usize) -> Self {
        Self::with_config(n, |config| config)
    }

    pub fn with_block_size(n: usize, block_size: usize) -> Self {
        Self::with_config(n, |config| config.with_block_size(block_size))
    }

    /// Build `n` replicas, adjusting each replica's default configuration
    /// with `customize`.
    pub fn with_config(
        n: usize,
        customize: impl Fn(ConsensusConfig) -> ConsensusConfig,
    ) -> Self {
        let (validators, signers) = make_validators(n);
        let verifier: Arc<dyn ValidatorVerifier> = validators;
        let mut replicas = Vec::with_capacity(n);
        let mut storages = Vec::with_capacity(n);
        for signer in &signers {
            let config = customize(
                ConsensusConfig::new(signer.author().0, n)
                    .with_pacemaker(PacemakerConfig::new(10, 4, 2.0, 3, 0)),
            );
            let storage = InMemorySafetyStorage::new();
            let safety_rules =
                SafetyRules::new(signer.clone(), verifier.clone(), Box::new(storage.clone()));
            replicas.push(RoundManager::new(
                config,
                signer.clone(),
                verifier.clone(),
                Ledger::in_memory(),
                safety_rules,
                Mempool::new(),
            ));
            storages.push(storage);
        }
        Self {
            replicas,
            signers,
            storages,
            inbox: VecDeque::new(),
            crashed: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replica(&self, index: usize) -> &RoundManager {
        &self.replicas[index]
    }

    pub fn replica_mut(&mut self, index: usize) -> &mut RoundManager {
        &mut self.replicas[index]
    }

    pub fn replicas(&self) -> &[RoundManager] {
        &self.replicas
    }

    pub fn signer(&self, index: usize) -> Arc<dyn ValidatorSigner> {
        self.signers[index].clone()
    }

    /// Safety storage backing replica `index`.
    pub fn safety_storage(&self, index: usize) -> &InMemorySafetyStorage {
        &self.storages[index]
    }

    /// Queue the same transactions at every replica.
    pub fn submit_all(&mut self, txns: Vec<Transaction>) {
        for replica in &mut self.replicas {
            for txn in &txns {
                replica.mempool_mut().submit(txn.clone());
            }
        }
    }

    /// Stop delivering to and from `index`.
    pub fn crash(&mut self, index: usize) {
        self.crashed.insert(ReplicaId(index as u32));
    }

    pub fn is_crashed(&self, index: usize) -> bool {
        self.crashed.contains(&ReplicaId(index as u32))
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    /// Drop every undelivered message.
    pub fn drop_pending(&mut self) {
        self.inbox.clear();
    }

    /// Drop the undelivered messages addressed to `index`. Returns how many
    /// were dropped.
    pub fn drop_pending_to(&mut self, index: usize) -> usize {
        let recipient = ReplicaId(index as u32);
        let before = self.inbox.len();
        self.inbox.retain(|(to, _)| *to != recipient);
        before - self.inbox.len()
    }

    /// Let every live replica propose for its initial round.
    pub fn start(&mut self) {
        for index in 0..self.replicas.len() {
            if !self.is_crashed(index) {
                let outbound = self.replicas[index].start();
                self.enqueue(outbound);
            }
        }
    }

    /// Fire the round timer of replica `index`.
    pub fn timeout(&mut self, index: usize) -> Result<(), ConsensusError> {
        if self.is_crashed(index) {
            return Ok(());
        }
        let round = self.replicas[index].current_round();
        let outbound = self.replicas[index].process_timer_expiry(round)?;
        self.enqueue(outbound);
        Ok(())
    }

    /// Fire the round timer of every live replica.
    pub fn timeout_all(&mut self) -> Result<(), ConsensusError> {
        for index in 0..self.replicas.len() {
            self.timeout(index)?;
        }
        Ok(())
    }

    /// Deliver the oldest queued message. Returns false if none was queued.
    pub fn step(&mut self) -> Result<bool, ConsensusError> {
        let Some((recipient, message)) = self.inbox.pop_front() else {
            return Ok(false);
        };
        if !self.crashed.contains(&recipient) {
            let outbound = self.replicas[recipient.index()].process_message(message)?;
            self.enqueue(outbound);
        }
        Ok(true)
    }

    /// Deliver queued messages until the queue drains or `max_steps` were
    /// delivered. Returns the number delivered.
    pub fn run(&mut self, max_steps: usize) -> Result<usize, ConsensusError> {
        let mut delivered = 0;
        while delivered < max_steps && self.step()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    fn enqueue(&mut self, outbound: Vec<Outbound>) {
        for item in outbound {
            match item {
                Outbound::Broadcast(message) => {
                    for index in 0..self.replicas.len() {
                        self.inbox
                            .push_back((ReplicaId(index as u32), message.clone()));
                    }
                },
                Outbound::Send { recipient, message } => {
                    self.inbox.push_back((recipient, message));
                },
            }
        }
    }

    /// Committed rounds of every live replica.
    pub fn committed_rounds(&self) -> Vec<Vec<Round>> {
        self.replicas
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.is_crashed(*index))
            .map(|(_, replica)| replica.ledger().committed_rounds())
            .collect()
    }

    /// True if every pair of committed ledgers agrees on its common prefix.
    pub fn ledgers_agree(&self) -> bool {
        let ledgers: Vec<Vec<consensus_traits::HashValue>> = self
            .replicas
            .iter()
            .map(|replica| {
                replica
                    .ledger()
                    .committed_blocks()
                    .iter()
                    .map(|committed| committed.block.id())
                    .collect()
            })
            .collect();
        ledgers.iter().all(|a| {
            ledgers.iter().all(|b| {
                let common = a.len().min(b.len());
                a[..common] == b[..common]
            })
        })
    }
}
