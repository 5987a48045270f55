// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Typed results of driver operations.

use consensus_traits::{ReplicaId, VerifyError};
use std::fmt;

use crate::ledger::ExecutionError;
use crate::proposal::ProposalMsg;
use crate::quorum_cert::QuorumCert;
use crate::safety_rules::SafetyError;
use crate::timeout::{TimeoutCertificate, TimeoutMsg};
use crate::types::{Round, TxnId};
use crate::votes::VoteMsg;

/// Why no vote was cast for a proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposalRejection {
    /// Block id or proposal signature does not check out.
    InvalidSignature(VerifyError),
    /// An embedded quorum certificate failed verification.
    InvalidCertificate(VerifyError),
    InvalidTimeoutCertificate(VerifyError),
    WrongRound {
        proposal_round: Round,
        current_round: Round,
    },
    NotLeader {
        sender: ReplicaId,
        leader: ReplicaId,
    },
    AuthorMismatch {
        author: ReplicaId,
        leader: ReplicaId,
    },
    /// Neither the block nor the block it certifies carries a payload.
    EmptyChain,
    /// The block extends a block this replica never executed.
    MissingParent(ExecutionError),
    Unsafe(SafetyError),
}

impl fmt::Display for ProposalRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature(e) => write!(f, "invalid proposal: {}", e),
            Self::InvalidCertificate(e) => write!(f, "invalid certificate: {}", e),
            Self::InvalidTimeoutCertificate(e) => {
                write!(f, "invalid timeout certificate: {}", e)
            },
            Self::WrongRound {
                proposal_round,
                current_round,
            } => write!(
                f,
                "proposal for round {} in round {}",
                proposal_round, current_round
            ),
            Self::NotLeader { sender, leader } => {
                write!(f, "sender {} is not the leader {}", sender, leader)
            },
            Self::AuthorMismatch { author, leader } => {
                write!(f, "block author {} is not the leader {}", author, leader)
            },
            Self::EmptyChain => write!(f, "no payload in the block or its certified parent"),
            Self::MissingParent(e) => write!(f, "{}", e),
            Self::Unsafe(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposalDecision {
    Voted(VoteMsg),
    Rejected(ProposalRejection),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalOutcome {
    pub decision: ProposalDecision,
    /// Transactions committed while processing the proposal's certificates.
    pub dequeued: Vec<TxnId>,
}

impl ProposalOutcome {
    pub fn vote(&self) -> Option<&VoteMsg> {
        match &self.decision {
            ProposalDecision::Voted(vote) => Some(vote),
            ProposalDecision::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&ProposalRejection> {
        match &self.decision {
            ProposalDecision::Voted(_) => None,
            ProposalDecision::Rejected(rejection) => Some(rejection),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Certificate formed by this vote.
    pub qc: Option<QuorumCert>,
    /// Proposal for the round the certificate opened, if this replica leads it.
    pub proposal: Option<ProposalMsg>,
    pub dequeued: Vec<TxnId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeoutOutcome {
    /// This replica's own timeout, joined after f+1 remote timeouts.
    pub local_timeout: Option<TimeoutMsg>,
    /// Timeout certificate to broadcast, formed by the leader of the
    /// timed out round.
    pub certificate: Option<TimeoutCertificate>,
    /// Proposal for the round the timeout certificate opened.
    pub proposal: Option<ProposalMsg>,
    pub dequeued: Vec<TxnId>,
}
