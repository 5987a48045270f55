// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Blocks and committed blocks.

use crate::crypto::{CanonicalWriter, Domain};
use crate::quorum_cert::{qc_round, QuorumCert};
use crate::types::{Round, Transaction};
use consensus_traits::{HashValue, ReplicaId, VerifyError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A proposed batch of transactions extending a certified parent.
///
/// The id is a digest of the author, round, payload, the certified parent id
/// and the parent certificate's signatures, so two blocks with the same
/// content and parent are the same block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    author: ReplicaId,
    round: Round,
    payload: Vec<Transaction>,
    /// Certificate of the parent, `None` for a block with no ancestors.
    qc: Option<QuorumCert>,
    id: HashValue,
}

impl Block {
    pub fn new(
        author: ReplicaId,
        round: Round,
        payload: Vec<Transaction>,
        qc: Option<QuorumCert>,
    ) -> Self {
        let id = Self::compute_id(author, round, &payload, qc.as_ref());
        Self {
            author,
            round,
            payload,
            qc,
            id,
        }
    }

    pub fn compute_id(
        author: ReplicaId,
        round: Round,
        payload: &[Transaction],
        qc: Option<&QuorumCert>,
    ) -> HashValue {
        let mut writer = CanonicalWriter::new(Domain::BlockId);
        writer.u32(author.0).i64(round).len_prefix(payload.len());
        for txn in payload {
            writer.str(&txn.id).str(&txn.client_id).str(&txn.command);
        }
        writer.opt_hash(qc.map(|qc| &qc.vote_info.id));
        let signatures = qc.map_or(&[][..], |qc| &qc.signatures[..]);
        writer.len_prefix(signatures.len());
        for (signer, signature) in signatures {
            writer.u32(signer.0).bytes(signature.as_bytes());
        }
        writer.digest()
    }

    pub fn id(&self) -> HashValue {
        self.id
    }

    pub fn author(&self) -> ReplicaId {
        self.author
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn payload(&self) -> &[Transaction] {
        &self.payload
    }

    pub fn qc(&self) -> Option<&QuorumCert> {
        self.qc.as_ref()
    }

    pub fn parent_id(&self) -> Option<HashValue> {
        self.qc.as_ref().map(QuorumCert::certified_block_id)
    }

    /// Round of the parent certificate.
    pub fn qc_round(&self) -> Round {
        qc_round(self.qc.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Recompute the id from the contents.
    pub fn verify_id(&self) -> Result<(), VerifyError> {
        if Self::compute_id(self.author, self.round, &self.payload, self.qc.as_ref()) != self.id {
            return Err(VerifyError::InvalidBlockId);
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block[id: {}, round: {}, author: {}, txns: {}, parent_round: {}]",
            self.id.short_str(),
            self.round,
            self.author,
            self.payload.len(),
            self.qc_round()
        )
    }
}

/// A block appended to the ledger together with its executed state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedBlock {
    pub block: Block,
    pub commit_state_id: HashValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txns(commands: &[&str]) -> Vec<Transaction> {
        commands
            .iter()
            .enumerate()
            .map(|(i, c)| Transaction::new(format!("t{}", i), "client", *c))
            .collect()
    }

    #[test]
    fn test_block_id_is_content_addressed() {
        let a = Block::new(ReplicaId(0), 1, txns(&["x"]), None);
        let b = Block::new(ReplicaId(0), 1, txns(&["x"]), None);
        assert_eq!(a.id(), b.id());

        assert_ne!(a.id(), Block::new(ReplicaId(1), 1, txns(&["x"]), None).id());
        assert_ne!(a.id(), Block::new(ReplicaId(0), 2, txns(&["x"]), None).id());
        assert_ne!(a.id(), Block::new(ReplicaId(0), 1, txns(&["y"]), None).id());
    }

    #[test]
    fn test_verify_id_detects_tampering() {
        let block = Block::new(ReplicaId(0), 3, txns(&["a", "b"]), None);
        assert!(block.verify_id().is_ok());

        let mut tampered = block.clone();
        tampered.payload.pop();
        assert_eq!(tampered.verify_id(), Err(VerifyError::InvalidBlockId));
    }

    #[test]
    fn test_block_without_parent() {
        let block = Block::new(ReplicaId(0), 0, Vec::new(), None);
        assert_eq!(block.parent_id(), None);
        assert_eq!(block.qc_round(), crate::types::NIL_ROUND);
        assert!(block.is_empty());
    }
}
