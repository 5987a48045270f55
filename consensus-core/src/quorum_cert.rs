// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Vote data and quorum certificates.

use crate::crypto::{CanonicalEncode, CanonicalWriter, Domain};
use crate::types::{Round, NIL_ROUND};
use consensus_traits::{
    HashValue, ReplicaId, Signature, ValidatorSigner, ValidatorVerifier, VerifyError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a vote certifies: a block, its parent and its speculative state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    /// Id of the certified block.
    pub id: HashValue,
    pub round: Round,
    /// `None` for a block without a parent certificate.
    pub parent_id: Option<HashValue>,
    pub parent_round: Round,
    /// Speculative state after executing the certified block.
    pub exec_state_id: HashValue,
}

impl CanonicalEncode for VoteInfo {
    fn canonical_bytes(&self) -> Vec<u8> {
        CanonicalWriter::new(Domain::VoteInfo)
            .hash(&self.id)
            .i64(self.round)
            .opt_hash(self.parent_id.as_ref())
            .i64(self.parent_round)
            .hash(&self.exec_state_id)
            .finish()
    }
}

/// The signed part of a vote.
///
/// Votes agree iff their `LedgerCommitInfo` encodings are equal, so its digest
/// is the aggregation key for pending votes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCommitInfo {
    /// State of the block this vote would commit, if any.
    pub commit_state_id: Option<HashValue>,
    pub vote_info_hash: HashValue,
}

impl CanonicalEncode for LedgerCommitInfo {
    fn canonical_bytes(&self) -> Vec<u8> {
        CanonicalWriter::new(Domain::LedgerCommitInfo)
            .opt_hash(self.commit_state_id.as_ref())
            .hash(&self.vote_info_hash)
            .finish()
    }
}

/// 2f+1 signatures over the same [`LedgerCommitInfo`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCert {
    pub vote_info: VoteInfo,
    pub ledger_commit_info: LedgerCommitInfo,
    /// Ordered by signer.
    pub signatures: Vec<(ReplicaId, Signature)>,
    /// Replica that aggregated the votes.
    pub author: ReplicaId,
    pub author_signature: Signature,
}

impl QuorumCert {
    pub fn new(
        vote_info: VoteInfo,
        ledger_commit_info: LedgerCommitInfo,
        signatures: Vec<(ReplicaId, Signature)>,
        signer: &dyn ValidatorSigner,
    ) -> Self {
        let author_signature =
            signer.sign(&Self::author_signing_bytes(&ledger_commit_info, &signatures));
        Self {
            vote_info,
            ledger_commit_info,
            signatures,
            author: signer.author(),
            author_signature,
        }
    }

    fn author_signing_bytes(
        ledger_commit_info: &LedgerCommitInfo,
        signatures: &[(ReplicaId, Signature)],
    ) -> Vec<u8> {
        let mut writer = CanonicalWriter::new(Domain::QuorumCertAuthor);
        writer.hash(&ledger_commit_info.hash());
        writer.len_prefix(signatures.len());
        for (author, signature) in signatures {
            writer.u32(author.0).bytes(signature.as_bytes());
        }
        writer.finish()
    }

    pub fn round(&self) -> Round {
        self.vote_info.round
    }

    /// Id of the certified block.
    pub fn certified_block_id(&self) -> HashValue {
        self.vote_info.id
    }

    pub fn parent_id(&self) -> Option<HashValue> {
        self.vote_info.parent_id
    }

    pub fn commit_state_id(&self) -> Option<HashValue> {
        self.ledger_commit_info.commit_state_id
    }

    pub fn signers(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.signatures.iter().map(|(author, _)| *author)
    }

    /// Verify the vote info digest, 2f+1 distinct signatures and the
    /// aggregator's signature.
    pub fn verify(&self, verifier: &dyn ValidatorVerifier) -> Result<(), VerifyError> {
        if self.vote_info.hash() != self.ledger_commit_info.vote_info_hash {
            return Err(VerifyError::InvalidVoteInfoHash);
        }
        verifier.verify_multi(
            &self.ledger_commit_info.canonical_bytes(),
            &self.signatures,
            verifier.quorum_size(),
        )?;
        verifier.verify(
            self.author,
            &Self::author_signing_bytes(&self.ledger_commit_info, &self.signatures),
            &self.author_signature,
        )
    }
}

impl fmt::Display for QuorumCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QC[round: {}, block: {}, commit: {}]",
            self.round(),
            self.vote_info.id.short_str(),
            self.commit_state_id().is_some()
        )
    }
}

/// Round of an optional certificate, [`NIL_ROUND`] if absent.
pub fn qc_round(qc: Option<&QuorumCert>) -> Round {
    qc.map_or(NIL_ROUND, QuorumCert::round)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChain;

    fn certified_chain() -> (TestChain, QuorumCert) {
        let mut chain = TestChain::new(4);
        let b0 = chain.propose(0, &["a"]);
        let qc = chain.certify(&b0);
        (chain, qc)
    }

    #[test]
    fn test_quorum_of_distinct_signers_verifies() {
        let (chain, qc) = certified_chain();
        let validators = chain.validators();
        assert_eq!(qc.signers().count(), 3);
        assert_eq!(qc.verify(validators.as_ref()), Ok(()));
    }

    #[test]
    fn test_too_few_signatures() {
        let (chain, mut qc) = certified_chain();
        let validators = chain.validators();
        qc.signatures.truncate(2);
        assert_eq!(
            qc.verify(validators.as_ref()),
            Err(VerifyError::TooFewSignatures {
                got: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_duplicate_signer_does_not_count_twice() {
        let (chain, mut qc) = certified_chain();
        let validators = chain.validators();
        qc.signatures[2] = qc.signatures[0].clone();
        assert_eq!(
            qc.verify(validators.as_ref()),
            Err(VerifyError::DuplicateSigner(ReplicaId(0)))
        );
    }

    #[test]
    fn test_signature_over_other_message() {
        let (chain, mut qc) = certified_chain();
        let validators = chain.validators();
        qc.signatures[1].1 = chain.signer(1).sign(b"another block");
        assert_eq!(
            qc.verify(validators.as_ref()),
            Err(VerifyError::InvalidSignature(ReplicaId(1)))
        );
    }

    #[test]
    fn test_tampered_vote_info_or_aggregator() {
        let (chain, qc) = certified_chain();
        let validators = chain.validators();

        let mut tampered = qc.clone();
        tampered.vote_info.round = 9;
        assert_eq!(
            tampered.verify(validators.as_ref()),
            Err(VerifyError::InvalidVoteInfoHash)
        );

        let mut tampered = qc;
        tampered.author = ReplicaId(3);
        assert_eq!(
            tampered.verify(validators.as_ref()),
            Err(VerifyError::InvalidSignature(ReplicaId(3)))
        );
    }
}
