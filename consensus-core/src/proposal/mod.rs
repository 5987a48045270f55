// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Proposal messages.
//!
//! The leader of a round wraps its new block together with the certificates
//! that justify entering the round and signs the result.

use crate::block::Block;
use crate::crypto::{CanonicalWriter, Domain};
use crate::quorum_cert::QuorumCert;
use crate::timeout::TimeoutCertificate;
use crate::types::{Round, TxnId};
use consensus_traits::{ReplicaId, Signature, ValidatorSigner, ValidatorVerifier, VerifyError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMsg {
    pub block: Block,
    /// Timeout certificate of the previous round if it ended without a
    /// certificate.
    pub last_round_tc: Option<TimeoutCertificate>,
    pub high_commit_qc: Option<QuorumCert>,
    /// Signature over `(block.id, block.round)`.
    pub signature: Signature,
    pub sender_id: ReplicaId,
    /// Ids of the transactions in the block payload.
    pub trx_ids: Vec<TxnId>,
}

impl ProposalMsg {
    pub fn new(
        block: Block,
        last_round_tc: Option<TimeoutCertificate>,
        high_commit_qc: Option<QuorumCert>,
        signer: &dyn ValidatorSigner,
    ) -> Self {
        let signature = signer.sign(&Self::signing_bytes(&block));
        let trx_ids = block.payload().iter().map(|txn| txn.id.clone()).collect();
        Self {
            block,
            last_round_tc,
            high_commit_qc,
            signature,
            sender_id: signer.author(),
            trx_ids,
        }
    }

    fn signing_bytes(block: &Block) -> Vec<u8> {
        CanonicalWriter::new(Domain::Proposal)
            .hash(&block.id())
            .i64(block.round())
            .finish()
    }

    pub fn round(&self) -> Round {
        self.block.round()
    }

    /// Check block id integrity and the sender's signature.
    pub fn verify(&self, verifier: &dyn ValidatorVerifier) -> Result<(), VerifyError> {
        self.block.verify_id()?;
        verifier.verify(self.sender_id, &Self::signing_bytes(&self.block), &self.signature)
    }
}

impl fmt::Display for ProposalMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proposal[{}, sender: {}]", self.block, self.sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ValidatorSet;
    use crate::types::Transaction;

    #[test]
    fn test_proposal_verification() {
        let (validators, signers) = ValidatorSet::generate(4, 1);
        let block = Block::new(
            ReplicaId(0),
            0,
            vec![Transaction::new("t0", "c", "put a 1")],
            None,
        );
        let proposal = ProposalMsg::new(block, None, None, &signers[0]);
        assert_eq!(proposal.trx_ids, vec!["t0".to_string()]);
        assert!(proposal.verify(&validators).is_ok());

        let mut resigned = proposal.clone();
        resigned.sender_id = ReplicaId(1);
        assert_eq!(
            resigned.verify(&validators),
            Err(VerifyError::InvalidSignature(ReplicaId(1)))
        );
    }

    #[test]
    fn test_proposal_with_forged_block_id() {
        let (validators, signers) = ValidatorSet::generate(4, 1);
        let block = Block::new(ReplicaId(0), 0, Vec::new(), None);
        let honest = ProposalMsg::new(block, None, None, &signers[0]);
        let other = Block::new(ReplicaId(0), 0, vec![Transaction::new("t9", "c", "x")], None);

        // Swap in a different payload while keeping the signed id
        let mut forged: ProposalMsg = honest.clone();
        forged.block = serde_json::from_value(serde_json::json!({
            "author": 0,
            "round": 0,
            "payload": other.payload(),
            "qc": null,
            "id": honest.block.id(),
        }))
        .unwrap();
        assert_eq!(forged.verify(&validators), Err(VerifyError::InvalidBlockId));
    }
}
