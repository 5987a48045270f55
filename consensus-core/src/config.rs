// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Replica configuration.

use crate::liveness::{LeaderElectionConfig, PacemakerConfig};
use consensus_traits::ReplicaId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of a single replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub replica_id: u32,
    pub num_validators: usize,
    /// Maximum number of transactions per block.
    pub block_size: usize,
    /// Directory for the safety state and the ledger log. In-memory storage
    /// is used when unset.
    pub data_dir: Option<PathBuf>,
    pub pacemaker: PacemakerConfig,
    pub leader_election: LeaderElectionConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            replica_id: 0,
            num_validators: 4,
            block_size: 100,
            data_dir: None,
            pacemaker: PacemakerConfig::default(),
            leader_election: LeaderElectionConfig::default(),
        }
    }
}

impl ConsensusConfig {
    pub fn new(replica_id: u32, num_validators: usize) -> Self {
        Self::default()
            .with_replica_id(replica_id)
            .with_num_validators(num_validators)
    }

    pub fn with_replica_id(mut self, replica_id: u32) -> Self {
        self.replica_id = replica_id;
        self
    }

    pub fn with_num_validators(mut self, num_validators: usize) -> Self {
        self.num_validators = num_validators;
        self.leader_election.num_validators = num_validators;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_pacemaker(mut self, pacemaker: PacemakerConfig) -> Self {
        self.pacemaker = pacemaker;
        self
    }

    pub fn with_leader_election(mut self, leader_election: LeaderElectionConfig) -> Self {
        self.leader_election = leader_election;
        self.leader_election.num_validators = self.num_validators;
        self
    }

    pub fn author(&self) -> ReplicaId {
        ReplicaId(self.replica_id)
    }

    /// `f = (n - 1) / 3`
    pub fn fault_tolerance(&self) -> usize {
        self.num_validators.saturating_sub(1) / 3
    }

    /// `2f + 1`
    pub fn quorum_size(&self) -> usize {
        2 * self.fault_tolerance() + 1
    }

    /// Leader election settings with the validator count of this config.
    pub fn leader_election_config(&self) -> LeaderElectionConfig {
        LeaderElectionConfig {
            num_validators: self.num_validators,
            ..self.leader_election.clone()
        }
    }
}
