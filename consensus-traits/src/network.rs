// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Network boundary for consensus messages.

use crate::core::{Error, ReplicaId};
use async_trait::async_trait;

/// Delivers consensus messages between replicas.
///
/// Delivery is best effort. Lost messages are recovered by the protocol
/// through timeouts, so implementations do not retry.
#[async_trait]
pub trait ConsensusNetwork<M>: Send + Sync
where
    M: Clone + Send + Sync + 'static,
{
    /// Send a message to one replica.
    async fn send(&self, recipient: ReplicaId, message: M) -> Result<(), Error>;

    /// Send a message to every replica, including the sender.
    async fn broadcast(&self, message: M) -> Result<(), Error>;
}
