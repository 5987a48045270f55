// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Async replica runtime.
//!
//! Each replica is one task consuming a single event stream: messages from
//! the network, expiry of the round timer, client transactions. Events are
//! processed one at a time to completion, so the round manager needs no
//! locking. The round timer is one tokio task sleeping until the deadline of
//! the pacemaker's current timer; it is replaced whenever the pacemaker
//! re-arms.

mod message;
mod network;

pub use message::{ConsensusMessage, Outbound};
pub use network::{EventChannel, LocalNetwork};

use consensus_traits::{ConsensusNetwork, ReplicaId};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ConsensusError;
use crate::liveness::RoundTimer;
use crate::round_manager::RoundManager;
use crate::types::{Round, Transaction};

#[derive(Clone, Debug)]
pub enum ConsensusEvent {
    Message(ConsensusMessage),
    /// The timer armed for `round` with `generation` expired.
    LocalTimeout { round: Round, generation: u64 },
    NewTransaction(Transaction),
    Shutdown,
}

pub struct ReplicaRuntime<N>
where
    N: ConsensusNetwork<ConsensusMessage>,
{
    round_manager: RoundManager,
    network: N,
    events_tx: mpsc::UnboundedSender<ConsensusEvent>,
    events_rx: mpsc::UnboundedReceiver<ConsensusEvent>,
    timer_task: Option<JoinHandle<()>>,
    armed_generation: Option<u64>,
}

impl<N> ReplicaRuntime<N>
where
    N: ConsensusNetwork<ConsensusMessage>,
{
    pub fn new(round_manager: RoundManager, network: N, channel: EventChannel) -> Self {
        let (events_tx, events_rx) = channel;
        Self {
            round_manager,
            network,
            events_tx,
            events_rx,
            timer_task: None,
            armed_generation: None,
        }
    }

    /// Sender feeding this replica's event stream.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ConsensusEvent> {
        self.events_tx.clone()
    }

    pub fn round_manager(&self) -> &RoundManager {
        &self.round_manager
    }

    /// Run until [`ConsensusEvent::Shutdown`] or a fatal error.
    ///
    /// Returns the round manager so its ledger can be inspected.
    pub async fn run(mut self) -> Result<RoundManager, ConsensusError> {
        let author = self.round_manager.author();
        info!(
            "[replica {}] Starting in round {}",
            author,
            self.round_manager.current_round()
        );
        let outbound = self.round_manager.start();
        Self::dispatch(&self.network, author, outbound).await;
        self.arm_timer();

        while let Some(event) = self.events_rx.recv().await {
            let result = match event {
                ConsensusEvent::Message(message) => self.round_manager.process_message(message),
                ConsensusEvent::LocalTimeout { round, generation } => {
                    if Some(generation) != self.armed_generation {
                        debug!("[replica {}] Ignoring stale timer of round {}", author, round);
                        continue;
                    }
                    self.round_manager.process_timer_expiry(round)
                },
                ConsensusEvent::NewTransaction(txn) => {
                    if !self.round_manager.submit_transaction(txn) {
                        debug!("[replica {}] Duplicate transaction", author);
                    }
                    Ok(Vec::new())
                },
                ConsensusEvent::Shutdown => break,
            };

            match result {
                Ok(outbound) => Self::dispatch(&self.network, author, outbound).await,
                Err(e) => {
                    error!("[replica {}] Halting: {}", author, e);
                    self.cancel_timer();
                    return Err(e);
                },
            }
            self.arm_timer();
        }

        self.cancel_timer();
        info!(
            "[replica {}] Stopped in round {} with {} committed blocks",
            author,
            self.round_manager.current_round(),
            self.round_manager.ledger().committed_blocks().len()
        );
        Ok(self.round_manager)
    }

    async fn dispatch(network: &N, author: ReplicaId, outbound: Vec<Outbound>) {
        for item in outbound {
            let result = match item {
                Outbound::Broadcast(message) => network.broadcast(message).await,
                Outbound::Send { recipient, message } => network.send(recipient, message).await,
            };
            if let Err(e) = result {
                warn!("[replica {}] Network error: {}", author, e);
            }
        }
    }

    /// Replace the timer task if the pacemaker re-armed since the last call.
    fn arm_timer(&mut self) {
        let timer: RoundTimer = self.round_manager.timer();
        if self.armed_generation == Some(timer.generation) {
            return;
        }
        self.cancel_timer();

        let events_tx = self.events_tx.clone();
        let deadline = tokio::time::Instant::from_std(timer.deadline());
        self.timer_task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events_tx.send(ConsensusEvent::LocalTimeout {
                round: timer.round,
                generation: timer.generation,
            });
        }));
        self.armed_generation = Some(timer.generation);
        debug!(
            "[replica {}] Timer for round {} set to {:?}",
            self.round_manager.author(),
            timer.round,
            timer.duration
        );
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer_task.take() {
            handle.abort();
        }
    }
}
