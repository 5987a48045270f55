// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Leader election.
//!
//! Leaders rotate round-robin, two consecutive rounds per replica. With
//! reputation enabled, a chain of two consecutive certificates additionally
//! elects the leader two rounds ahead among recent voters, excluding recent
//! block authors.

use consensus_traits::ReplicaId;
use log::debug;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::block_tree::BlockTree;
use crate::quorum_cert::QuorumCert;
use crate::types::{is_consecutive, Round};

/// Configuration for leader election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderElectionConfig {
    /// Number of validators
    pub num_validators: usize,
    /// Number of recent certificates whose signers are candidates
    pub window_size: usize,
    /// Number of recent block authors excluded from election
    pub exclude_size: usize,
    pub reputation_enabled: bool,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            num_validators: 4,
            window_size: 10,
            exclude_size: 3,
            reputation_enabled: false,
        }
    }
}

impl LeaderElectionConfig {
    pub fn new(num_validators: usize) -> Self {
        Self {
            num_validators,
            ..Self::default()
        }
    }

    pub fn with_reputation(mut self, window_size: usize, exclude_size: usize) -> Self {
        self.reputation_enabled = true;
        self.window_size = window_size;
        self.exclude_size = exclude_size;
        self
    }
}

/// Round-robin proposer election, each leader keeps two consecutive rounds.
#[derive(Clone, Debug)]
pub struct RoundRobinProposer {
    num_validators: usize,
}

impl RoundRobinProposer {
    pub const ROUNDS_PER_LEADER: Round = 2;

    pub fn new(num_validators: usize) -> Self {
        Self { num_validators }
    }

    pub fn get_leader(&self, round: Round) -> ReplicaId {
        let n = Round::try_from(self.num_validators.max(1)).unwrap_or(Round::MAX);
        let index = (round / Self::ROUNDS_PER_LEADER).rem_euclid(n);
        ReplicaId(u32::try_from(index).unwrap_or_default())
    }
}

pub struct LeaderElection {
    config: LeaderElectionConfig,
    round_robin: RoundRobinProposer,
    /// Reputation-elected leaders by round, override round-robin
    reputation_leaders: BTreeMap<Round, ReplicaId>,
}

impl LeaderElection {
    pub fn new(config: LeaderElectionConfig) -> Self {
        Self {
            round_robin: RoundRobinProposer::new(config.num_validators),
            config,
            reputation_leaders: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &LeaderElectionConfig {
        &self.config
    }

    pub fn get_leader(&self, round: Round) -> ReplicaId {
        self.reputation_leaders
            .get(&round)
            .copied()
            .unwrap_or_else(|| self.round_robin.get_leader(round))
    }

    /// Elect the leader of `current_round + 1` after entering `current_round`
    /// on `qc`, if `qc` closes a chain of two consecutive rounds.
    pub fn update_leaders(
        &mut self,
        qc: &QuorumCert,
        current_round: Round,
        block_tree: &BlockTree,
    ) -> Option<ReplicaId> {
        if !self.config.reputation_enabled {
            return None;
        }
        let extended_round = qc.vote_info.parent_round;
        if !is_consecutive(qc.round(), extended_round)
            || !is_consecutive(current_round, qc.round())
        {
            return None;
        }
        let leader = self.elect_reputation_leader(qc, block_tree)?;
        self.reputation_leaders.insert(current_round + 1, leader);
        self.reputation_leaders = self.reputation_leaders.split_off(&current_round);
        debug!(
            "Reputation leader of round {} is {}",
            current_round + 1,
            leader
        );
        Some(leader)
    }

    /// Pick a random recent voter that did not author a recent block.
    ///
    /// The random source is seeded with the certificate round so every replica
    /// holding the same blocks elects the same leader. The walk stops at the
    /// first block missing from `block_tree`, so a replica that missed a
    /// recent block can elect a different leader than its peers. It then
    /// rejects that round's proposal as coming from the wrong leader and the
    /// round ends on a timeout; safety is unaffected.
    pub fn elect_reputation_leader(
        &self,
        qc: &QuorumCert,
        block_tree: &BlockTree,
    ) -> Option<ReplicaId> {
        let mut active_replicas = BTreeSet::new();
        let mut last_authors = BTreeSet::new();
        let mut current_qc = qc;
        let mut depth = 0;
        while depth < self.config.window_size || last_authors.len() < self.config.exclude_size {
            let Some(block) = current_qc
                .parent_id()
                .and_then(|parent_id| block_tree.find_block(&parent_id))
            else {
                break;
            };
            if depth < self.config.window_size {
                active_replicas.extend(current_qc.signers());
            }
            if last_authors.len() < self.config.exclude_size {
                last_authors.insert(block.author());
            }
            let Some(parent_qc) = block.qc() else {
                break;
            };
            current_qc = parent_qc;
            depth += 1;
        }

        let candidates: Vec<ReplicaId> = active_replicas
            .difference(&last_authors)
            .copied()
            .collect();
        let seed = u64::try_from(qc.round()).unwrap_or_default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        candidates.choose(&mut rng).copied()
    }
}
