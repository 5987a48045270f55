// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use consensus_traits::{HashValue, ReplicaId, Signature};
use std::collections::HashMap;

use crate::crypto::SignatureAggregator;
use crate::quorum_cert::{LedgerCommitInfo, VoteInfo};
use crate::types::Round;
use crate::votes::VoteMsg;

/// Result of adding a vote to pending votes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteReceptionResult {
    /// The vote was added, the bucket now holds `count` votes
    Accepted { count: usize },

    /// The sender already voted for this ledger commit info
    Duplicate,

    /// The vote brought its bucket to exactly the quorum size
    QuorumReached(QuorumVotes),
}

/// Everything needed to build a certificate from one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumVotes {
    pub vote_info: VoteInfo,
    pub ledger_commit_info: LedgerCommitInfo,
    pub signatures: Vec<(ReplicaId, Signature)>,
}

#[derive(Clone, Debug)]
struct VoteBucket {
    vote_info: VoteInfo,
    ledger_commit_info: LedgerCommitInfo,
    aggregator: SignatureAggregator,
}

/// Votes collected by a prospective leader, bucketed by the digest of their
/// ledger commit info.
///
/// Aggregation is strictly additive: a bucket only grows, and exactly one
/// [`VoteReceptionResult::QuorumReached`] is reported per bucket.
#[derive(Clone, Debug)]
pub struct PendingVotes {
    buckets: HashMap<HashValue, VoteBucket>,
    quorum_size: usize,
}

impl PendingVotes {
    pub fn new(quorum_size: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            quorum_size,
        }
    }

    /// Add a verified vote.
    pub fn insert_vote(&mut self, vote: &VoteMsg) -> VoteReceptionResult {
        let bucket = self
            .buckets
            .entry(vote.vote_key())
            .or_insert_with(|| VoteBucket {
                vote_info: vote.vote_info.clone(),
                ledger_commit_info: vote.ledger_commit_info.clone(),
                aggregator: SignatureAggregator::new(),
            });

        if !bucket
            .aggregator
            .add_signature(vote.sender, vote.signature.clone())
        {
            return VoteReceptionResult::Duplicate;
        }

        let count = bucket.aggregator.signer_count();
        if count == self.quorum_size {
            return VoteReceptionResult::QuorumReached(QuorumVotes {
                vote_info: bucket.vote_info.clone(),
                ledger_commit_info: bucket.ledger_commit_info.clone(),
                signatures: bucket.aggregator.signatures(),
            });
        }
        VoteReceptionResult::Accepted { count }
    }

    /// Number of votes collected for a ledger commit info digest.
    pub fn vote_count(&self, key: &HashValue) -> usize {
        self.buckets
            .get(key)
            .map_or(0, |bucket| bucket.aggregator.signer_count())
    }

    /// Drop buckets for rounds that already have a certificate.
    pub fn prune_up_to(&mut self, round: Round) {
        self.buckets
            .retain(|_, bucket| bucket.vote_info.round > round);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
