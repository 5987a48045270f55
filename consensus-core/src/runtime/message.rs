// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use consensus_traits::{ReplicaId, TransactionPool};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConsensusError;
use crate::proposal::ProposalMsg;
use crate::round_manager::RoundManager;
use crate::timeout::{TimeoutCertificate, TimeoutMsg};
use crate::types::{Round, Transaction};
use crate::votes::VoteMsg;

/// Messages exchanged between replicas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(ProposalMsg),
    Vote(VoteMsg),
    Timeout(TimeoutMsg),
    TimeoutCertificate(TimeoutCertificate),
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposal(proposal) => write!(f, "{}", proposal),
            Self::Vote(vote) => write!(f, "{}", vote),
            Self::Timeout(timeout) => write!(f, "{}", timeout),
            Self::TimeoutCertificate(tc) => write!(f, "{}", tc),
        }
    }
}

/// A message produced by the driver together with where it goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Broadcast(ConsensusMessage),
    Send {
        recipient: ReplicaId,
        message: ConsensusMessage,
    },
}

impl<P> RoundManager<P>
where
    P: TransactionPool<Transaction = Transaction>,
{
    /// Proposal for the initial round if this replica leads it.
    pub fn start(&mut self) -> Vec<Outbound> {
        self.process_new_round_event(None)
            .map(|proposal| Outbound::Broadcast(ConsensusMessage::Proposal(proposal)))
            .into_iter()
            .collect()
    }

    /// Process one incoming message and route what it produced.
    ///
    /// Proposals, timeouts and timeout certificates are broadcast. A vote
    /// goes to the leader of the round after the one voted in, where it can
    /// form a certificate.
    pub fn process_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Result<Vec<Outbound>, ConsensusError> {
        let mut outbound = Vec::new();
        match message {
            ConsensusMessage::Proposal(proposal) => {
                let outcome = self.process_proposal_msg(&proposal)?;
                if let Some(vote) = outcome.vote() {
                    outbound.push(Outbound::Send {
                        recipient: self.leader_election().get_leader(vote.round() + 1),
                        message: ConsensusMessage::Vote(vote.clone()),
                    });
                }
            },
            ConsensusMessage::Vote(vote) => {
                let outcome = self.process_vote_msg(&vote)?;
                if let Some(proposal) = outcome.proposal {
                    outbound.push(Outbound::Broadcast(ConsensusMessage::Proposal(proposal)));
                }
            },
            ConsensusMessage::Timeout(timeout) => {
                let outcome = self.process_timeout_msg(&timeout)?;
                if let Some(local) = outcome.local_timeout {
                    outbound.push(Outbound::Broadcast(ConsensusMessage::Timeout(local)));
                }
                if let Some(tc) = outcome.certificate {
                    let message = ConsensusMessage::TimeoutCertificate(tc);
                    outbound.push(Outbound::Broadcast(message));
                }
                if let Some(proposal) = outcome.proposal {
                    outbound.push(Outbound::Broadcast(ConsensusMessage::Proposal(proposal)));
                }
            },
            ConsensusMessage::TimeoutCertificate(tc) => {
                if let Some(proposal) = self.process_certificate_tc(&tc) {
                    outbound.push(Outbound::Broadcast(ConsensusMessage::Proposal(proposal)));
                }
            },
        }
        Ok(outbound)
    }

    /// Handle expiry of the timer armed for `round`.
    pub fn process_timer_expiry(
        &mut self,
        round: Round,
    ) -> Result<Vec<Outbound>, ConsensusError> {
        Ok(self
            .process_local_timeout(round)?
            .map(|timeout| Outbound::Broadcast(ConsensusMessage::Timeout(timeout)))
            .into_iter()
            .collect())
    }
}
