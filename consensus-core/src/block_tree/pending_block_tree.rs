// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::block::Block;
use crate::types::Round;
use consensus_traits::HashValue;
use std::collections::HashMap;

/// Uncommitted blocks keyed by id.
#[derive(Clone, Debug, Default)]
pub struct PendingBlockTree {
    blocks: HashMap<HashValue, Block>,
}

impl PendingBlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block. Re-inserting a known id is a no-op.
    pub fn add(&mut self, block: Block) {
        self.blocks.entry(block.id()).or_insert(block);
    }

    pub fn find(&self, block_id: &HashValue) -> Option<&Block> {
        self.blocks.get(block_id)
    }

    pub fn contains(&self, block_id: &HashValue) -> bool {
        self.blocks.contains_key(block_id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every block that cannot extend the newly committed block.
    ///
    /// Keeps the committed block itself and every higher-round block whose
    /// ancestry does not provably leave the committed chain. Returns the ids
    /// of the removed blocks.
    pub fn prune(&mut self, committed_id: HashValue, committed_round: Round) -> Vec<HashValue> {
        let removed: Vec<HashValue> = self
            .blocks
            .values()
            .filter(|block| !self.extends(block, &committed_id, committed_round))
            .map(Block::id)
            .collect();
        for block_id in &removed {
            self.blocks.remove(block_id);
        }
        removed
    }

    fn extends(&self, block: &Block, committed_id: &HashValue, committed_round: Round) -> bool {
        if block.id() == *committed_id {
            return true;
        }
        if block.round() <= committed_round {
            return false;
        }
        let mut cursor = block;
        loop {
            let Some(parent_id) = cursor.parent_id() else {
                return false;
            };
            if parent_id == *committed_id {
                return true;
            }
            if cursor.qc_round() <= committed_round {
                return false;
            }
            match self.blocks.get(&parent_id) {
                Some(parent) => cursor = parent,
                // Unknown ancestry above the committed round may still connect
                None => return true,
            }
        }
    }
}
