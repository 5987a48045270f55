// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::crypto::CanonicalEncode;
use crate::quorum_cert::{LedgerCommitInfo, QuorumCert, VoteInfo};
use crate::types::Round;
use consensus_traits::{
    HashValue, ReplicaId, Signature, ValidatorSigner, ValidatorVerifier, VerifyError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A signed vote for a block, sent to the leader of the next round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub vote_info: VoteInfo,
    pub ledger_commit_info: LedgerCommitInfo,
    /// Highest commit certificate known to the voter.
    pub high_commit_qc: Option<QuorumCert>,
    pub sender: ReplicaId,
    /// Signature over the canonical encoding of `ledger_commit_info`.
    pub signature: Signature,
}

impl VoteMsg {
    pub fn new(
        vote_info: VoteInfo,
        ledger_commit_info: LedgerCommitInfo,
        high_commit_qc: Option<QuorumCert>,
        signer: &dyn ValidatorSigner,
    ) -> Self {
        let signature = signer.sign(&ledger_commit_info.canonical_bytes());
        Self {
            vote_info,
            ledger_commit_info,
            high_commit_qc,
            sender: signer.author(),
            signature,
        }
    }

    pub fn round(&self) -> Round {
        self.vote_info.round
    }

    /// Aggregation key: votes with equal keys can form one certificate.
    pub fn vote_key(&self) -> HashValue {
        self.ledger_commit_info.hash()
    }

    /// Check that the ledger commit info covers the vote info and that the
    /// sender signed it. The attached commit certificate is verified
    /// separately.
    pub fn verify(&self, verifier: &dyn ValidatorVerifier) -> Result<(), VerifyError> {
        if self.vote_info.hash() != self.ledger_commit_info.vote_info_hash {
            return Err(VerifyError::InvalidVoteInfoHash);
        }
        verifier.verify(
            self.sender,
            &self.ledger_commit_info.canonical_bytes(),
            &self.signature,
        )
    }
}

impl fmt::Display for VoteMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote[round: {}, block: {}, sender: {}]",
            self.vote_info.round,
            self.vote_info.id.short_str(),
            self.sender
        )
    }
}
