// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Fatal consensus errors.
//!
//! Rejected messages are not errors: the driver reports them as typed
//! outcomes and moves on. The variants here stop the replica.

use consensus_traits::HashValue;

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A certificate asks to commit a block this replica never stored.
    #[error("Block {block_id} required for commit is missing")]
    MissingBlock { block_id: HashValue },

    #[error("Failed to persist committed block: {0}")]
    LedgerPersistence(#[from] std::io::Error),

    #[error("Failed to persist safety state: {0}")]
    SafetyPersistence(String),
}

impl ConsensusError {
    pub fn missing_block(block_id: HashValue) -> Self {
        Self::MissingBlock { block_id }
    }
}
