// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Voting and timeout rules.
//!
//! # Voting rule
//!
//! A replica votes for block B with parent certificate round `qc_round` iff
//! `B.round > max(highest_vote_round, qc_round)` and EITHER
//! 1. `B.round == qc_round + 1`, OR
//! 2. `B.round == tc.round + 1` and `qc_round >= max(tc.tmo_high_qc_rounds)`
//!
//! # Timeout rule
//!
//! A replica times out in round R holding a certificate of `qc_round` iff
//! `qc_round >= highest_qc_round`, `R > max(highest_vote_round - 1, qc_round)`
//! and EITHER `R == qc_round + 1` OR `R == tc.round + 1`.
//!
//! The state is persisted after every change and before the signed message
//! is returned.

use consensus_traits::{
    HashValue, ReplicaId, SafetyStorage, ValidatorSigner, ValidatorVerifier, VerifyError,
};
use log::debug;
use std::fmt;
use std::sync::Arc;

use super::{SafetyError, SafetyStateData};
use crate::block::Block;
use crate::block_tree::BlockTree;
use crate::crypto::CanonicalEncode;
use crate::ledger::Ledger;
use crate::quorum_cert::{qc_round, LedgerCommitInfo, QuorumCert, VoteInfo};
use crate::timeout::{tc_round, TimeoutCertificate, TimeoutInfo};
use crate::types::{is_consecutive, Round};
use crate::votes::VoteMsg;

pub struct SafetyRules {
    author: ReplicaId,
    state: SafetyStateData,
    signer: Arc<dyn ValidatorSigner>,
    verifier: Arc<dyn ValidatorVerifier>,
    storage: Box<dyn SafetyStorage<SafetyStateData>>,
}

impl SafetyRules {
    pub fn new(
        signer: Arc<dyn ValidatorSigner>,
        verifier: Arc<dyn ValidatorVerifier>,
        storage: Box<dyn SafetyStorage<SafetyStateData>>,
    ) -> Self {
        Self::with_state(SafetyStateData::default(), signer, verifier, storage)
    }

    /// Restore safety rules from a persisted state.
    pub fn with_state(
        state: SafetyStateData,
        signer: Arc<dyn ValidatorSigner>,
        verifier: Arc<dyn ValidatorVerifier>,
        storage: Box<dyn SafetyStorage<SafetyStateData>>,
    ) -> Self {
        Self {
            author: signer.author(),
            state,
            signer,
            verifier,
            storage,
        }
    }

    pub fn state(&self) -> SafetyStateData {
        self.state
    }

    pub fn highest_vote_round(&self) -> Round {
        self.state.highest_vote_round
    }

    pub fn highest_qc_round(&self) -> Round {
        self.state.highest_qc_round
    }

    /// A certificate-less extension is justified by `tc`.
    pub fn is_safe_to_extend(block_round: Round, qc_round: Round, tc: &TimeoutCertificate) -> bool {
        is_consecutive(block_round, tc.round) && qc_round >= tc.max_high_qc_round()
    }

    pub fn is_safe_to_vote(
        &self,
        block_round: Round,
        qc_round: Round,
        tc: Option<&TimeoutCertificate>,
    ) -> bool {
        if block_round <= self.state.highest_vote_round.max(qc_round) {
            return false;
        }
        is_consecutive(block_round, qc_round)
            || tc.map_or(false, |tc| Self::is_safe_to_extend(block_round, qc_round, tc))
    }

    pub fn is_safe_to_timeout(
        &self,
        round: Round,
        qc_round: Round,
        tc: Option<&TimeoutCertificate>,
    ) -> bool {
        if qc_round < self.state.highest_qc_round
            || round <= (self.state.highest_vote_round - 1).max(qc_round)
        {
            return false;
        }
        is_consecutive(round, qc_round) || tc.map_or(false, |tc| is_consecutive(round, tc.round))
    }

    pub fn verify_qc(&self, qc: &QuorumCert) -> Result<(), VerifyError> {
        qc.verify(self.verifier.as_ref())
    }

    pub fn verify_tc(&self, tc: &TimeoutCertificate) -> Result<(), VerifyError> {
        tc.verify(self.verifier.as_ref())
    }

    /// Vote for an executed block.
    ///
    /// The vote carries a commit state iff the block directly follows its
    /// parent certificate, in which case the certificate formed on the block
    /// commits its grandparent.
    pub fn make_vote(
        &mut self,
        block: &Block,
        last_tc: Option<&TimeoutCertificate>,
        block_tree: &BlockTree,
    ) -> Result<VoteMsg, SafetyError> {
        if let Some(qc) = block.qc() {
            self.verify_qc(qc)?;
        }
        if let Some(tc) = last_tc {
            self.verify_tc(tc)?;
        }

        let qc_round = block.qc_round();
        if !self.is_safe_to_vote(block.round(), qc_round, last_tc) {
            return Err(SafetyError::UnsafeVote {
                block_round: block.round(),
                qc_round,
                highest_vote_round: self.state.highest_vote_round,
                tc_round: tc_round(last_tc),
            });
        }

        let (vote_info, ledger_commit_info) = build_vote_data(block, block_tree.ledger())?;

        let mut next = self.state;
        next.update_highest_qc_round(qc_round);
        next.increase_highest_vote_round(block.round());
        self.persist(next)?;

        Ok(VoteMsg::new(
            vote_info,
            ledger_commit_info,
            block_tree.high_commit_qc().cloned(),
            self.signer.as_ref(),
        ))
    }

    /// Sign a timeout for `round`.
    pub fn make_timeout(
        &mut self,
        round: Round,
        high_qc: Option<&QuorumCert>,
        last_tc: Option<&TimeoutCertificate>,
    ) -> Result<TimeoutInfo, SafetyError> {
        if let Some(qc) = high_qc {
            self.verify_qc(qc)?;
        }
        if let Some(tc) = last_tc {
            self.verify_tc(tc)?;
        }

        let qc_round = qc_round(high_qc);
        if !self.is_safe_to_timeout(round, qc_round, last_tc) {
            return Err(SafetyError::UnsafeTimeout {
                round,
                qc_round,
                highest_vote_round: self.state.highest_vote_round,
                highest_qc_round: self.state.highest_qc_round,
                tc_round: tc_round(last_tc),
            });
        }

        let mut next = self.state;
        next.increase_highest_vote_round(round);
        self.persist(next)?;

        Ok(TimeoutInfo::new(round, high_qc.cloned(), self.signer.as_ref()))
    }

    fn persist(&mut self, next: SafetyStateData) -> Result<(), SafetyError> {
        if next == self.state {
            return Ok(());
        }
        self.storage
            .save_safety_state(&next)
            .map_err(|e| SafetyError::Persistence(e.to_string()))?;
        debug!("[replica {}] Persisted {}", self.author, next);
        self.state = next;
        Ok(())
    }
}

impl fmt::Debug for SafetyRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyRules")
            .field("author", &self.author)
            .field("state", &self.state)
            .finish()
    }
}

/// Vote data for an executed block.
pub fn build_vote_data(
    block: &Block,
    ledger: &Ledger,
) -> Result<(VoteInfo, LedgerCommitInfo), SafetyError> {
    let exec_state_id = ledger
        .state_of(&block.id())
        .ok_or(SafetyError::UnexecutedBlock {
            block_id: block.id(),
        })?;
    let vote_info = VoteInfo {
        id: block.id(),
        round: block.round(),
        parent_id: block.parent_id(),
        parent_round: block.qc_round(),
        exec_state_id,
    };
    let ledger_commit_info = LedgerCommitInfo {
        commit_state_id: commit_state_id(block, ledger),
        vote_info_hash: vote_info.hash(),
    };
    Ok((vote_info, ledger_commit_info))
}

/// State of the grandparent if the block directly follows its parent.
fn commit_state_id(block: &Block, ledger: &Ledger) -> Option<HashValue> {
    let qc = block.qc()?;
    if !is_consecutive(block.round(), qc.round()) {
        return None;
    }
    qc.parent_id()
        .and_then(|grandparent| ledger.state_of(&grandparent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety_rules::InMemorySafetyStorage;
    use crate::testing::TestChain;
    use crate::types::NIL_ROUND;

    fn tc(chain: &TestChain, round: Round, hqc_rounds: &[Round]) -> TimeoutCertificate {
        chain.timeout_certificate(round, hqc_rounds)
    }

    #[test]
    fn test_vote_rule_requires_consecutive_or_tc() {
        let chain = TestChain::new(4);
        let rules = chain.safety_rules(0);

        assert!(rules.is_safe_to_vote(0, NIL_ROUND, None));
        assert!(rules.is_safe_to_vote(5, 4, None));
        assert!(!rules.is_safe_to_vote(5, 3, None));

        // Extension through a timeout certificate of round 4
        let cert = tc(&chain, 4, &[2, 3, 1]);
        assert!(rules.is_safe_to_vote(5, 3, Some(&cert)));
        assert!(!rules.is_safe_to_vote(5, 2, Some(&cert)));
        assert!(!rules.is_safe_to_vote(6, 3, Some(&cert)));
    }

    #[test]
    fn test_vote_rule_rejects_old_rounds() {
        let mut chain = TestChain::new(4);
        let mut rules = chain.safety_rules(1);
        let b0 = chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);

        rules.make_vote(&b1, None, chain.block_tree()).unwrap();
        assert_eq!(rules.highest_vote_round(), 1);
        assert_eq!(rules.highest_qc_round(), 0);

        // At most one vote per round, and never backwards
        assert!(matches!(
            rules.make_vote(&b1, None, chain.block_tree()),
            Err(SafetyError::UnsafeVote { block_round: 1, .. })
        ));
        assert!(rules.make_vote(&b0, None, chain.block_tree()).is_err());
    }

    #[test]
    fn test_timeout_rule() {
        let chain = TestChain::new(4);
        let mut rules = chain.safety_rules(0);

        assert!(rules.is_safe_to_timeout(0, NIL_ROUND, None));
        assert!(!rules.is_safe_to_timeout(1, NIL_ROUND, None));

        let cert = tc(&chain, 0, &[NIL_ROUND, NIL_ROUND, NIL_ROUND]);
        assert!(rules.is_safe_to_timeout(1, NIL_ROUND, Some(&cert)));

        rules.make_timeout(0, None, None).unwrap();
        assert_eq!(rules.highest_vote_round(), 0);
        // Timing out the same round twice is allowed
        assert!(rules.is_safe_to_timeout(0, NIL_ROUND, None));
    }

    #[test]
    fn test_timeout_rejects_stale_qc() {
        let mut chain = TestChain::new(4);
        let mut rules = chain.safety_rules(2);
        let b0 = chain.propose(0, &["a"]);
        let qc0 = chain.certify(&b0);
        let b1 = chain.propose(1, &["b"]);
        rules.make_vote(&b1, None, chain.block_tree()).unwrap();

        // Holding no certificate while having voted on top of round 0
        assert!(matches!(
            rules.make_timeout(2, None, None),
            Err(SafetyError::UnsafeTimeout { highest_qc_round: 0, .. })
        ));
        assert!(matches!(
            rules.make_timeout(2, Some(&qc0), None),
            Err(SafetyError::UnsafeTimeout { .. })
        ));
        let qc1 = chain.certify(&b1);
        assert!(rules.make_timeout(2, Some(&qc1), None).is_ok());
    }

    #[test]
    fn test_vote_carries_commit_state_only_for_consecutive_rounds() {
        let mut chain = TestChain::new(4);
        let mut rules = chain.safety_rules(3);
        let b0 = chain.propose(0, &["a"]);
        chain.propose(1, &["b"]);
        let b2 = chain.propose(2, &["c"]);
        let b4 = chain.propose(4, &["d"]);

        let vote = rules.make_vote(&b2, None, chain.block_tree()).unwrap();
        assert_eq!(
            vote.ledger_commit_info.commit_state_id,
            chain.block_tree().ledger().state_of(&b0.id())
        );
        assert_eq!(vote.vote_info.parent_round, 1);

        let cert = tc(&chain, 3, &[2, 1, 0]);
        let vote = rules.make_vote(&b4, Some(&cert), chain.block_tree()).unwrap();
        assert_eq!(vote.ledger_commit_info.commit_state_id, None);
    }

    #[test]
    fn test_invalid_certificate_is_not_a_safety_rejection() {
        let mut chain = TestChain::new(4);
        let mut rules = chain.safety_rules(0);
        chain.propose(0, &["a"]);
        let b1 = chain.propose(1, &["b"]);

        let mut forged = b1.qc().cloned().unwrap();
        forged.signatures.truncate(2);
        let block = Block::new(b1.author(), 1, Vec::new(), Some(forged));
        let err = rules.make_vote(&block, None, chain.block_tree()).unwrap_err();
        assert!(matches!(err, SafetyError::InvalidCertificate(_)));
        assert!(!err.is_safety_rejection());
        assert_eq!(rules.highest_vote_round(), NIL_ROUND);
    }

    #[test]
    fn test_state_is_persisted_before_vote_returns() {
        let mut chain = TestChain::new(4);
        let storage = InMemorySafetyStorage::new();
        let mut rules = chain.safety_rules_with_storage(0, Box::new(storage.clone()));
        let b0 = chain.propose(0, &["a"]);

        rules.make_vote(&b0, None, chain.block_tree()).unwrap();
        assert_eq!(storage.current(), Some(SafetyStateData::new(0, NIL_ROUND)));
    }

    #[test]
    fn test_persistence_failure_keeps_state_and_withholds_vote() {
        let mut chain = TestChain::new(4);
        let storage = InMemorySafetyStorage::new();
        storage.fail_writes(true);
        let mut rules = chain.safety_rules_with_storage(0, Box::new(storage.clone()));
        let b0 = chain.propose(0, &["a"]);

        let err = rules.make_vote(&b0, None, chain.block_tree()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(rules.highest_vote_round(), NIL_ROUND);
        assert_eq!(storage.current(), None);
    }
}
