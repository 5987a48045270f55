// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Protocol driver.
//!
//! The round manager ties the block tree, safety rules, pacemaker and leader
//! election together and reacts to one event at a time:
//!
//! - proposals are checked against the current round and leader, executed
//!   and voted on;
//! - votes are aggregated into quorum certificates, after which the leader
//!   of the next round proposes;
//! - timeouts are aggregated into timeout certificates, which the leader of
//!   the timed out round broadcasts;
//! - local timer expiry produces this replica's own timeout.
//!
//! Every signature and certificate carried by an incoming message is
//! verified before any state changes. Rejected messages are reported as
//! typed outcomes; only [`ConsensusError`]s are returned as errors, and they
//! mean the replica must stop.

mod outcome;

pub use outcome::{
    ProposalDecision, ProposalOutcome, ProposalRejection, TimeoutOutcome, VoteOutcome,
};

use consensus_traits::{
    ReplicaId, TransactionPool, ValidatorSigner, ValidatorVerifier, VerifyError,
};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::block_tree::BlockTree;
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::ledger::{FileLedgerLog, Ledger};
use crate::liveness::{LeaderElection, Pacemaker, PacemakerBuilder, RoundTimer};
use crate::mempool::Mempool;
use crate::proposal::ProposalMsg;
use crate::quorum_cert::QuorumCert;
use crate::safety_rules::{
    load_safety_rules, FileSafetyStorage, InMemorySafetyStorage, SafetyError, SafetyRules,
};
use crate::timeout::{TimeoutCertificate, TimeoutMsg};
use crate::types::{Round, Transaction, TxnId, NIL_ROUND};
use crate::votes::VoteMsg;

/// File name of the committed command log inside the data directory.
pub const LEDGER_LOG_FILE: &str = "ledger.log";

pub struct RoundManager<P = Mempool>
where
    P: TransactionPool<Transaction = Transaction>,
{
    author: ReplicaId,
    config: ConsensusConfig,
    block_tree: BlockTree,
    safety_rules: SafetyRules,
    pacemaker: Pacemaker,
    leader_election: LeaderElection,
    mempool: P,
    signer: Arc<dyn ValidatorSigner>,
    verifier: Arc<dyn ValidatorVerifier>,
    last_proposed_round: Round,
}

impl RoundManager<Mempool> {
    /// Build a replica from its configuration.
    ///
    /// With a data directory the committed commands go to `ledger.log` and
    /// the safety state is restored from and persisted to the same
    /// directory. Without one both stay in memory.
    pub fn from_config(
        config: ConsensusConfig,
        signer: Arc<dyn ValidatorSigner>,
        verifier: Arc<dyn ValidatorVerifier>,
    ) -> anyhow::Result<Self> {
        let (ledger, safety_rules) = match &config.data_dir {
            Some(dir) => {
                let log = FileLedgerLog::open(dir.join(LEDGER_LOG_FILE))?;
                let storage = FileSafetyStorage::in_dir(dir);
                let safety_rules =
                    load_safety_rules(Box::new(storage), signer.clone(), verifier.clone())?;
                (Ledger::new(Box::new(log)), safety_rules)
            },
            None => (
                Ledger::in_memory(),
                SafetyRules::new(
                    signer.clone(),
                    verifier.clone(),
                    Box::new(InMemorySafetyStorage::new()),
                ),
            ),
        };
        Ok(Self::new(
            config,
            signer,
            verifier,
            ledger,
            safety_rules,
            Mempool::new(),
        ))
    }
}

impl<P> RoundManager<P>
where
    P: TransactionPool<Transaction = Transaction>,
{
    pub fn new(
        config: ConsensusConfig,
        signer: Arc<dyn ValidatorSigner>,
        verifier: Arc<dyn ValidatorVerifier>,
        ledger: Ledger,
        safety_rules: SafetyRules,
        mempool: P,
    ) -> Self {
        let author = signer.author();
        let block_tree = BlockTree::new(ledger, signer.clone(), config.quorum_size());
        let pacemaker = PacemakerBuilder::from_config(config.pacemaker.clone())
            .build(author, config.fault_tolerance());
        let leader_election = LeaderElection::new(config.leader_election_config());
        Self {
            author,
            config,
            block_tree,
            safety_rules,
            pacemaker,
            leader_election,
            mempool,
            signer,
            verifier,
            last_proposed_round: NIL_ROUND,
        }
    }

    pub fn author(&self) -> ReplicaId {
        self.author
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn current_round(&self) -> Round {
        self.pacemaker.current_round()
    }

    pub fn timer(&self) -> RoundTimer {
        self.pacemaker.timer()
    }

    pub fn block_tree(&self) -> &BlockTree {
        &self.block_tree
    }

    pub fn ledger(&self) -> &Ledger {
        self.block_tree.ledger()
    }

    pub fn safety_rules(&self) -> &SafetyRules {
        &self.safety_rules
    }

    pub fn pacemaker(&self) -> &Pacemaker {
        &self.pacemaker
    }

    pub fn leader_election(&self) -> &LeaderElection {
        &self.leader_election
    }

    pub fn mempool(&self) -> &P {
        &self.mempool
    }

    pub fn mempool_mut(&mut self) -> &mut P {
        &mut self.mempool
    }

    pub fn is_leader(&self, round: Round) -> bool {
        self.leader_election.get_leader(round) == self.author
    }

    /// Queue a client transaction for future proposals.
    pub fn submit_transaction(&mut self, txn: Transaction) -> bool {
        self.mempool.submit(txn)
    }

    /// Process a certificate received from outside.
    ///
    /// Commits what the certificate allows and enters the next round. An
    /// invalid certificate is dropped without touching any state.
    pub fn process_certificate_qc(
        &mut self,
        qc: Option<&QuorumCert>,
    ) -> Result<Vec<TxnId>, ConsensusError> {
        if let Some(qc) = qc {
            if let Err(e) = qc.verify(self.verifier.as_ref()) {
                warn!("[replica {}] Dropping {}: {}", self.author, qc, e);
                return Ok(Vec::new());
            }
        }
        self.apply_qc(qc)
    }

    /// Process a verified certificate.
    fn apply_qc(&mut self, qc: Option<&QuorumCert>) -> Result<Vec<TxnId>, ConsensusError> {
        let committed = self.block_tree.process_qc(qc)?;
        if !committed.is_empty() {
            let removed = self.mempool.remove(&committed);
            debug!(
                "[replica {}] Dequeued {} of {} committed transactions",
                self.author,
                removed.len(),
                committed.len()
            );
        }
        if let (Some(event), Some(qc)) = (self.pacemaker.advance_round_qc(qc), qc) {
            self.leader_election
                .update_leaders(qc, event.round, &self.block_tree);
        }
        Ok(committed)
    }

    /// Process a proposal and vote for it if it is acceptable.
    pub fn process_proposal_msg(
        &mut self,
        proposal: &ProposalMsg,
    ) -> Result<ProposalOutcome, ConsensusError> {
        if let Err(e) = proposal.verify(self.verifier.as_ref()) {
            let rejection = ProposalRejection::InvalidSignature(e);
            return Ok(self.reject(proposal, rejection, Vec::new()));
        }
        let certificates =
            self.verify_certificates(proposal.block.qc(), proposal.high_commit_qc.as_ref());
        if let Err(e) = certificates {
            let rejection = ProposalRejection::InvalidCertificate(e);
            return Ok(self.reject(proposal, rejection, Vec::new()));
        }

        let mut dequeued = self.apply_qc(proposal.block.qc())?;
        dequeued.extend(self.apply_qc(proposal.high_commit_qc.as_ref())?);

        if let Some(tc) = &proposal.last_round_tc {
            if let Err(e) = self.safety_rules.verify_tc(tc) {
                return Ok(self.reject(
                    proposal,
                    ProposalRejection::InvalidTimeoutCertificate(e),
                    dequeued,
                ));
            }
            self.pacemaker.advance_round_tc(Some(tc));
        }

        let block = &proposal.block;
        let current_round = self.pacemaker.current_round();
        if block.round() != current_round {
            self.store_late_proposal(proposal);
            let rejection = ProposalRejection::WrongRound {
                proposal_round: block.round(),
                current_round,
            };
            return Ok(self.reject(proposal, rejection, dequeued));
        }
        let leader = self.leader_election.get_leader(current_round);
        if proposal.sender_id != leader {
            let rejection = ProposalRejection::NotLeader {
                sender: proposal.sender_id,
                leader,
            };
            return Ok(self.reject(proposal, rejection, dequeued));
        }
        if block.author() != leader {
            let rejection = ProposalRejection::AuthorMismatch {
                author: block.author(),
                leader,
            };
            return Ok(self.reject(proposal, rejection, dequeued));
        }
        if !self.block_tree.has_payload_or_certified_payload(block) {
            return Ok(self.reject(proposal, ProposalRejection::EmptyChain, dequeued));
        }
        if let Err(e) = self.block_tree.execute_and_insert(block.clone()) {
            let rejection = ProposalRejection::MissingParent(e);
            return Ok(self.reject(proposal, rejection, dequeued));
        }

        match self
            .safety_rules
            .make_vote(block, proposal.last_round_tc.as_ref(), &self.block_tree)
        {
            Ok(vote) => {
                self.pacemaker.restart_timer();
                info!("[replica {}] Voting for {}", self.author, block);
                Ok(ProposalOutcome {
                    decision: ProposalDecision::Voted(vote),
                    dequeued,
                })
            },
            Err(e) if e.is_fatal() => Err(ConsensusError::SafetyPersistence(e.to_string())),
            Err(e) => Ok(self.reject(proposal, ProposalRejection::Unsafe(e), dequeued)),
        }
    }

    /// Keep a correctly led block that arrived after this replica left its
    /// round, so a later commit can find it.
    fn store_late_proposal(&mut self, proposal: &ProposalMsg) {
        let block = &proposal.block;
        if block.round() >= self.pacemaker.current_round() {
            return;
        }
        let leader = self.leader_election.get_leader(block.round());
        if proposal.sender_id == leader && block.author() == leader {
            match self.block_tree.execute_and_insert(block.clone()) {
                Ok(_) => debug!("[replica {}] Storing late {}", self.author, block),
                Err(e) => debug!("[replica {}] Not storing late {}: {}", self.author, block, e),
            }
        }
    }

    fn reject(
        &self,
        proposal: &ProposalMsg,
        rejection: ProposalRejection,
        dequeued: Vec<TxnId>,
    ) -> ProposalOutcome {
        match &rejection {
            ProposalRejection::Unsafe(_) | ProposalRejection::WrongRound { .. } => debug!(
                "[replica {}] Not voting for {}: {}",
                self.author, proposal, rejection
            ),
            _ => warn!(
                "[replica {}] Rejecting {}: {}",
                self.author, proposal, rejection
            ),
        }
        ProposalOutcome {
            decision: ProposalDecision::Rejected(rejection),
            dequeued,
        }
    }

    fn verify_certificates(
        &self,
        qc: Option<&QuorumCert>,
        high_commit_qc: Option<&QuorumCert>,
    ) -> Result<(), VerifyError> {
        for qc in qc.into_iter().chain(high_commit_qc) {
            self.safety_rules.verify_qc(qc)?;
        }
        Ok(())
    }

    /// Propose a block if this replica leads the current round and has not
    /// proposed in it yet.
    pub fn process_new_round_event(
        &mut self,
        last_tc: Option<TimeoutCertificate>,
    ) -> Option<ProposalMsg> {
        let round = self.pacemaker.current_round();
        if !self.is_leader(round) || self.last_proposed_round >= round {
            return None;
        }

        let exclude = self.block_tree.pending_transaction_ids();
        let txns = self.get_transactions(&exclude);
        let block = self.block_tree.generate_block(txns, round);
        if let Err(e) = self.block_tree.execute_and_insert(block.clone()) {
            warn!("[replica {}] Cannot propose {}: {}", self.author, block, e);
            return None;
        }
        self.last_proposed_round = round;
        info!(
            "[replica {}] Proposing {} with {} transactions",
            self.author,
            block,
            block.payload().len()
        );
        Some(ProposalMsg::new(
            block,
            last_tc,
            self.block_tree.high_commit_qc().cloned(),
            self.signer.as_ref(),
        ))
    }

    /// Up to `block_size` queued transactions in arrival order.
    pub fn get_transactions(&self, exclude: &HashSet<TxnId>) -> Vec<Transaction> {
        self.mempool.take(self.config.block_size, exclude)
    }

    /// Aggregate a vote; a new certificate lets the next leader propose.
    pub fn process_vote_msg(&mut self, vote: &VoteMsg) -> Result<VoteOutcome, ConsensusError> {
        let verified = vote
            .verify(self.verifier.as_ref())
            .and_then(|_| self.verify_certificates(None, vote.high_commit_qc.as_ref()));
        if let Err(e) = verified {
            warn!("[replica {}] Dropping {}: {}", self.author, vote, e);
            return Ok(VoteOutcome::default());
        }

        let (qc, mut dequeued) = self.block_tree.process_vote(vote)?;
        let Some(qc) = qc else {
            return Ok(VoteOutcome {
                dequeued,
                ..VoteOutcome::default()
            });
        };
        dequeued.extend(self.apply_qc(Some(&qc))?);
        let proposal = self.process_new_round_event(None);
        Ok(VoteOutcome {
            qc: Some(qc),
            proposal,
            dequeued,
        })
    }

    /// Aggregate a remote timeout.
    pub fn process_timeout_msg(
        &mut self,
        msg: &TimeoutMsg,
    ) -> Result<TimeoutOutcome, ConsensusError> {
        if let Err(e) = self.verify_timeout_msg(msg) {
            warn!("[replica {}] Dropping {}: {}", self.author, msg, e);
            return Ok(TimeoutOutcome::default());
        }

        let mut dequeued = self.apply_qc(msg.tmo_info.high_qc.as_ref())?;
        dequeued.extend(self.apply_qc(msg.high_commit_qc.as_ref())?);
        self.pacemaker.advance_round_tc(msg.last_round_tc.as_ref());

        let remote = self
            .pacemaker
            .process_remote_timeout(
                msg,
                &mut self.safety_rules,
                &self.block_tree,
                &self.leader_election,
            )
            .map_err(|e| ConsensusError::SafetyPersistence(e.to_string()))?;

        let proposal = match &remote.certificate {
            Some(tc) => {
                self.pacemaker.advance_round_tc(Some(tc));
                self.process_new_round_event(Some(tc.clone()))
            },
            None => None,
        };
        Ok(TimeoutOutcome {
            local_timeout: remote.local_timeout,
            certificate: remote.certificate,
            proposal,
            dequeued,
        })
    }

    /// Process a timeout certificate broadcast by the leader of the timed
    /// out round.
    ///
    /// Enters the round after the certificate; the leader of that round
    /// proposes with the certificate attached. An invalid certificate is
    /// dropped.
    pub fn process_certificate_tc(&mut self, tc: &TimeoutCertificate) -> Option<ProposalMsg> {
        if let Err(e) = self.safety_rules.verify_tc(tc) {
            warn!("[replica {}] Dropping {}: {}", self.author, tc, e);
            return None;
        }
        self.pacemaker.advance_round_tc(Some(tc));
        if tc.round + 1 != self.pacemaker.current_round() {
            return None;
        }
        self.process_new_round_event(Some(tc.clone()))
    }

    fn verify_timeout_msg(&self, msg: &TimeoutMsg) -> Result<(), VerifyError> {
        msg.tmo_info.verify(self.verifier.as_ref())?;
        let high_qc = msg.tmo_info.high_qc.as_ref();
        self.verify_certificates(high_qc, msg.high_commit_qc.as_ref())?;
        if let Some(tc) = &msg.last_round_tc {
            self.safety_rules.verify_tc(tc)?;
        }
        Ok(())
    }

    /// The round timer armed for `round` fired.
    ///
    /// Expiries of rounds this replica already left are ignored. Otherwise
    /// the timer is re-armed and the replica signs a timeout, unless its
    /// safety rules refuse.
    pub fn process_local_timeout(
        &mut self,
        round: Round,
    ) -> Result<Option<TimeoutMsg>, ConsensusError> {
        if round != self.pacemaker.current_round() {
            debug!(
                "[replica {}] Ignoring timer of round {} in round {}",
                self.author,
                round,
                self.pacemaker.current_round()
            );
            return Ok(None);
        }
        self.pacemaker.restart_timer();
        match self
            .pacemaker
            .local_timeout_round(&mut self.safety_rules, &self.block_tree)
        {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => self.escalate(e).map(|_| None),
        }
    }

    fn escalate(&self, e: SafetyError) -> Result<(), ConsensusError> {
        if e.is_fatal() {
            return Err(ConsensusError::SafetyPersistence(e.to_string()));
        }
        debug!("[replica {}] Not timing out: {}", self.author, e);
        Ok(())
    }
}
