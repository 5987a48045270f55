// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! In-process network connecting the replicas of a local cluster.

use anyhow::anyhow;
use async_trait::async_trait;
use consensus_traits::core::Error;
use consensus_traits::{ConsensusNetwork, ReplicaId};
use log::trace;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use super::{ConsensusEvent, ConsensusMessage};

/// Channel endpoints of one replica's event stream.
pub type EventChannel = (
    mpsc::UnboundedSender<ConsensusEvent>,
    mpsc::UnboundedReceiver<ConsensusEvent>,
);

/// One replica's handle on the shared in-memory mesh.
///
/// Messages from or to an isolated replica are dropped.
#[derive(Clone)]
pub struct LocalNetwork {
    author: ReplicaId,
    peers: Arc<Vec<mpsc::UnboundedSender<ConsensusEvent>>>,
    isolated: Arc<RwLock<HashSet<ReplicaId>>>,
}

impl LocalNetwork {
    /// Connect `n` replicas. Returns each replica's network handle together
    /// with its event channel.
    pub fn mesh(n: usize) -> Vec<(LocalNetwork, EventChannel)> {
        let channels: Vec<EventChannel> = (0..n).map(|_| mpsc::unbounded_channel()).collect();
        let peers = Arc::new(channels.iter().map(|(tx, _)| tx.clone()).collect::<Vec<_>>());
        let isolated = Arc::new(RwLock::new(HashSet::new()));
        channels
            .into_iter()
            .enumerate()
            .map(|(index, channel)| {
                let network = LocalNetwork {
                    author: ReplicaId(index as u32),
                    peers: peers.clone(),
                    isolated: isolated.clone(),
                };
                (network, channel)
            })
            .collect()
    }

    pub fn author(&self) -> ReplicaId {
        self.author
    }

    /// Cut `replica` off from every other replica.
    pub fn isolate(&self, replica: ReplicaId) {
        if let Ok(mut isolated) = self.isolated.write() {
            isolated.insert(replica);
        }
    }

    pub fn reconnect(&self, replica: ReplicaId) {
        if let Ok(mut isolated) = self.isolated.write() {
            isolated.remove(&replica);
        }
    }

    fn is_isolated(&self, replica: ReplicaId) -> bool {
        self.isolated
            .read()
            .map(|isolated| isolated.contains(&replica))
            .unwrap_or(false)
    }

    fn deliver(&self, recipient: ReplicaId, message: ConsensusMessage) -> Result<(), Error> {
        let cut_off = self.is_isolated(self.author) || self.is_isolated(recipient);
        if recipient != self.author && cut_off {
            trace!("Dropping {} from {} to {}", message, self.author, recipient);
            return Ok(());
        }
        let peer = self
            .peers
            .get(recipient.index())
            .ok_or_else(|| anyhow!("Unknown replica {}", recipient))?;
        peer.send(ConsensusEvent::Message(message))
            .map_err(|_| anyhow!("Replica {} stopped", recipient))
    }
}

#[async_trait]
impl ConsensusNetwork<ConsensusMessage> for LocalNetwork {
    async fn send(&self, recipient: ReplicaId, message: ConsensusMessage) -> Result<(), Error> {
        self.deliver(recipient, message)
    }

    async fn broadcast(&self, message: ConsensusMessage) -> Result<(), Error> {
        let mut failed = Vec::new();
        for index in 0..self.peers.len() {
            let recipient = ReplicaId(index as u32);
            if self.deliver(recipient, message.clone()).is_err() {
                failed.push(recipient);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Broadcast did not reach replicas {:?}", failed))
        }
    }
}
