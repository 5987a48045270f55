// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Vote messages and vote aggregation
//!
//! Votes are bucketed by the digest of the ledger commit info they sign. A
//! bucket that reaches 2f+1 distinct signers becomes a quorum certificate.

mod pending_votes;
mod vote_msg;

pub use pending_votes::{PendingVotes, QuorumVotes, VoteReceptionResult};
pub use vote_msg::VoteMsg;
