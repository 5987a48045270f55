// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout the consensus algorithm

use consensus_traits::PoolTransaction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A round number in the consensus protocol
///
/// Rounds increment monotonically. Each round has a designated leader who is
/// responsible for proposing a block. Signed so that "no round yet" can be
/// expressed as [`NIL_ROUND`].
pub type Round = i64;

/// Round of a missing certificate and the initial safety state.
pub const NIL_ROUND: Round = -1;

/// The first round a replica enters.
pub const GENESIS_ROUND: Round = 0;

/// Client-assigned transaction identifier.
pub type TxnId = String;

/// A client command waiting to be ordered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub client_id: String,
    pub command: String,
    /// Number of times the client re-submitted this transaction.
    pub retry_count: u32,
}

impl Transaction {
    pub fn new(
        id: impl Into<TxnId>,
        client_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            command: command.into(),
            retry_count: 0,
        }
    }
}

impl PoolTransaction for Transaction {
    type Id = TxnId;

    fn id(&self) -> &TxnId {
        &self.id
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.command)
    }
}

/// True iff `round` directly follows `previous`.
pub fn is_consecutive(round: Round, previous: Round) -> bool {
    previous + 1 == round
}
