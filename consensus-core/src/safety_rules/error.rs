// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::types::Round;
use consensus_traits::{HashValue, VerifyError};

/// Why the safety rules refused to sign.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafetyError {
    #[error(
        "Unsafe to vote in round {block_round} extending qc round {qc_round} \
         (highest vote round {highest_vote_round}, tc round {tc_round})"
    )]
    UnsafeVote {
        block_round: Round,
        qc_round: Round,
        highest_vote_round: Round,
        tc_round: Round,
    },

    #[error(
        "Unsafe to time out round {round} with qc round {qc_round} \
         (highest vote round {highest_vote_round}, highest qc round {highest_qc_round}, \
         tc round {tc_round})"
    )]
    UnsafeTimeout {
        round: Round,
        qc_round: Round,
        highest_vote_round: Round,
        highest_qc_round: Round,
        tc_round: Round,
    },

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(#[from] VerifyError),

    #[error("Block {block_id} has not been executed")]
    UnexecutedBlock { block_id: HashValue },

    #[error("Failed to persist safety state: {0}")]
    Persistence(String),
}

impl SafetyError {
    /// The voting or timeout rule refused. Expected during normal operation.
    pub fn is_safety_rejection(&self) -> bool {
        matches!(self, Self::UnsafeVote { .. } | Self::UnsafeTimeout { .. })
    }

    /// The replica can no longer guarantee safety and must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
