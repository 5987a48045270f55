// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Pacemaker for round timeout and progression.
//!
//! The pacemaker owns the current round. It enters round `r + 1` when it sees
//! a certificate (QC or TC) for round `r`, collects remote timeouts, and sizes
//! the round timer from an estimate of the post-GST message delay.

use consensus_traits::ReplicaId;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::block_tree::BlockTree;
use crate::liveness::LeaderElection;
use crate::quorum_cert::{qc_round, QuorumCert};
use crate::safety_rules::{SafetyError, SafetyRules};
use crate::timeout::{TimeoutCertificate, TimeoutInfo, TimeoutMsg};
use crate::types::{Round, GENESIS_ROUND, NIL_ROUND};

/// Configuration for the pacemaker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacemakerConfig {
    /// Estimated upper bound on message delay after GST
    pub gst_estimate_ms: u64,
    /// Round timer is this many message delays
    pub timeout_multiplier: u32,
    /// Multiplier for exponential backoff
    pub exponent_base: f64,
    /// Maximum exponent for exponential backoff
    pub max_exponent: usize,
    /// Initial round number
    pub initial_round: Round,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            gst_estimate_ms: 250,
            timeout_multiplier: 4,
            exponent_base: 1.5,
            max_exponent: 6,
            initial_round: GENESIS_ROUND,
        }
    }
}

impl PacemakerConfig {
    /// Create a new pacemaker configuration.
    pub fn new(
        gst_estimate_ms: u64,
        timeout_multiplier: u32,
        exponent_base: f64,
        max_exponent: usize,
        initial_round: Round,
    ) -> Self {
        Self {
            gst_estimate_ms,
            timeout_multiplier,
            exponent_base,
            max_exponent,
            initial_round,
        }
    }

    /// Round timer right after a certificate-driven round change.
    pub fn base_duration(&self) -> Duration {
        let delay_ms = self
            .gst_estimate_ms
            .saturating_mul(u64::from(self.timeout_multiplier));
        Duration::from_millis(delay_ms)
    }
}

/// Reason for starting a new round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NewRoundReason {
    /// Started because we received a quorum certificate for the previous round
    QuorumCertificate,
    /// Started because the previous round timed out
    Timeout { rounds_since_qc: usize },
}

impl Display for NewRoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewRoundReason::QuorumCertificate => write!(f, "QCReady"),
            NewRoundReason::Timeout { rounds_since_qc } => {
                write!(f, "Timeout(rounds_since_qc={})", rounds_since_qc)
            },
        }
    }
}

/// Event produced when a new round starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRoundEvent {
    /// The new round number
    pub round: Round,
    /// Reason for starting this round
    pub reason: NewRoundReason,
    /// Timeout duration for this round
    pub timeout_duration: Duration,
}

/// The armed round timer.
///
/// `generation` changes every time the timer is restarted, so an expiry can
/// be matched against the timer that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundTimer {
    pub round: Round,
    pub generation: u64,
    pub duration: Duration,
    pub started_at: Instant,
}

impl RoundTimer {
    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }
}

/// Strategy for calculating round time intervals.
///
/// This trait allows different strategies for determining how long
/// each round should last, typically increasing the duration when
/// progress is stalled.
pub trait RoundIntervalStrategy: Send + Sync {
    /// Get the duration for a round.
    ///
    /// `rounds_since_qc` is the number of rounds entered since the last
    /// round entered on a quorum certificate (0 for that round itself).
    fn get_round_duration(&self, rounds_since_qc: usize) -> Duration;
}

/// Exponential backoff interval strategy.
///
/// Formula: base * exponent_base^min(index, max_exponent)
#[derive(Clone, Debug)]
pub struct ExponentialIntervalStrategy {
    base_ms: u64,
    exponent_base: f64,
    max_exponent: usize,
}

impl ExponentialIntervalStrategy {
    /// Create a new exponential interval strategy. The exponent is capped at 31.
    pub fn new(base: Duration, exponent_base: f64, max_exponent: usize) -> Self {
        Self {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            exponent_base: exponent_base.max(1.0),
            max_exponent: max_exponent.min(31),
        }
    }

    /// Same duration for every round.
    pub fn fixed(duration: Duration) -> Self {
        Self::new(duration, 1.0, 0)
    }

    pub fn from_config(config: &PacemakerConfig) -> Self {
        Self::new(config.base_duration(), config.exponent_base, config.max_exponent)
    }
}

impl RoundIntervalStrategy for ExponentialIntervalStrategy {
    fn get_round_duration(&self, rounds_since_qc: usize) -> Duration {
        let pow = rounds_since_qc.min(self.max_exponent) as i32;
        let multiplier = self.exponent_base.powi(pow);
        let duration_ms = ((self.base_ms as f64) * multiplier).ceil() as u64;
        Duration::from_millis(duration_ms)
    }
}

/// What a remote timeout triggered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteTimeoutOutcome {
    /// This replica's own timeout, emitted when f+1 replicas timed out.
    pub local_timeout: Option<TimeoutMsg>,
    /// The timeout certificate, returned only to the leader of the timed out
    /// round, which broadcasts it.
    pub certificate: Option<TimeoutCertificate>,
}

/// Pacemaker for managing round timeouts and progression.
pub struct Pacemaker<S = ExponentialIntervalStrategy>
where
    S: RoundIntervalStrategy,
{
    author: ReplicaId,
    fault_tolerance: usize,

    /// Strategy for calculating round intervals
    interval_strategy: S,

    current_round: Round,

    /// Certificate that let this replica enter `current_round`, if it was a TC
    last_round_tc: Option<TimeoutCertificate>,

    /// Round of the QC that last advanced the round, drives the backoff
    highest_certified_round: Round,

    pending_timeouts: BTreeMap<Round, BTreeMap<ReplicaId, TimeoutInfo>>,

    timer: RoundTimer,
}

impl<S> Pacemaker<S>
where
    S: RoundIntervalStrategy,
{
    /// Create a new pacemaker in `config.initial_round` with the timer armed.
    pub fn new(
        author: ReplicaId,
        fault_tolerance: usize,
        interval_strategy: S,
        config: &PacemakerConfig,
    ) -> Self {
        let current_round = config.initial_round;
        let duration = interval_strategy.get_round_duration(0);
        Self {
            author,
            fault_tolerance,
            interval_strategy,
            current_round,
            last_round_tc: None,
            highest_certified_round: current_round - 1,
            pending_timeouts: BTreeMap::new(),
            timer: RoundTimer {
                round: current_round,
                generation: 0,
                duration,
                started_at: Instant::now(),
            },
        }
    }

    pub fn current_round(&self) -> Round {
        self.current_round
    }

    pub fn last_round_tc(&self) -> Option<&TimeoutCertificate> {
        self.last_round_tc.as_ref()
    }

    pub fn timer(&self) -> RoundTimer {
        self.timer
    }

    fn rounds_since_qc(&self) -> usize {
        usize::try_from(self.current_round - self.highest_certified_round - 1).unwrap_or(0)
    }

    /// Duration of the round timer for the current round.
    pub fn get_round_timer(&self) -> Duration {
        self.interval_strategy
            .get_round_duration(self.rounds_since_qc())
    }

    /// Set the current round and restart the timer.
    pub fn start_timer(&mut self, new_round: Round) -> RoundTimer {
        self.current_round = new_round;
        self.pending_timeouts = self.pending_timeouts.split_off(&new_round);
        self.timer = RoundTimer {
            round: new_round,
            generation: self.timer.generation + 1,
            duration: self.get_round_timer(),
            started_at: Instant::now(),
        };
        self.timer
    }

    /// Restart the timer without changing the round.
    pub fn restart_timer(&mut self) -> RoundTimer {
        self.start_timer(self.current_round)
    }

    /// Sign and build this replica's timeout for the current round.
    pub fn local_timeout_round(
        &mut self,
        safety_rules: &mut SafetyRules,
        block_tree: &BlockTree,
    ) -> Result<TimeoutMsg, SafetyError> {
        let tmo_info = safety_rules.make_timeout(
            self.current_round,
            block_tree.high_qc(),
            self.last_round_tc.as_ref(),
        )?;
        info!(
            "[replica {}] Timing out round {} with high qc round {}",
            self.author,
            self.current_round,
            tmo_info.high_qc_round()
        );
        Ok(TimeoutMsg::new(
            tmo_info,
            self.last_round_tc.clone(),
            block_tree.high_commit_qc().cloned(),
        ))
    }

    /// Record a verified timeout from another replica.
    ///
    /// On exactly f+1 distinct senders for the current round this replica
    /// times out too. On exactly 2f+1 a certificate forms: the leader of the
    /// current round gets it back to broadcast, every other replica enters
    /// the next round right away and keeps the certificate to itself.
    pub fn process_remote_timeout(
        &mut self,
        msg: &TimeoutMsg,
        safety_rules: &mut SafetyRules,
        block_tree: &BlockTree,
        leader_election: &LeaderElection,
    ) -> Result<RemoteTimeoutOutcome, SafetyError> {
        let mut outcome = RemoteTimeoutOutcome::default();
        let tmo_info = &msg.tmo_info;
        if tmo_info.round < self.current_round {
            return Ok(outcome);
        }

        let senders = self.pending_timeouts.entry(tmo_info.round).or_default();
        if senders.contains_key(&tmo_info.sender) {
            return Ok(outcome);
        }
        let already_timed_out =
            tmo_info.sender == self.author || senders.contains_key(&self.author);
        senders.insert(tmo_info.sender, tmo_info.clone());
        let count = senders.len();
        debug!(
            "[replica {}] {} timeouts for round {}",
            self.author, count, tmo_info.round
        );

        if count == 2 * self.fault_tolerance + 1 {
            let tc = TimeoutCertificate::new(tmo_info.round, senders.values());
            info!("[replica {}] Formed {}", self.author, tc);
            if leader_election.get_leader(self.current_round) == self.author {
                outcome.certificate = Some(tc);
            } else {
                self.advance_round_tc(Some(&tc));
            }
            return Ok(outcome);
        }

        if count == self.fault_tolerance + 1
            && tmo_info.round == self.current_round
            && !already_timed_out
        {
            self.restart_timer();
            match self.local_timeout_round(safety_rules, block_tree) {
                Ok(local) => outcome.local_timeout = Some(local),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("[replica {}] Not joining timeout: {}", self.author, e),
            }
        }
        Ok(outcome)
    }

    /// Enter `tc.round + 1`. No-op for a missing or stale certificate.
    pub fn advance_round_tc(&mut self, tc: Option<&TimeoutCertificate>) -> Option<NewRoundEvent> {
        let tc = tc?;
        if tc.round < self.current_round {
            return None;
        }
        self.last_round_tc = Some(tc.clone());
        Some(self.enter_round(tc.round + 1, false))
    }

    /// Enter `qc.round + 1`. No-op for a missing or stale certificate.
    pub fn advance_round_qc(&mut self, qc: Option<&QuorumCert>) -> Option<NewRoundEvent> {
        let round = qc_round(qc);
        if round == NIL_ROUND || round < self.current_round {
            return None;
        }
        self.last_round_tc = None;
        self.highest_certified_round = round;
        Some(self.enter_round(round + 1, true))
    }

    fn enter_round(&mut self, round: Round, from_qc: bool) -> NewRoundEvent {
        let timer = self.start_timer(round);
        let reason = if from_qc {
            NewRoundReason::QuorumCertificate
        } else {
            NewRoundReason::Timeout {
                rounds_since_qc: self.rounds_since_qc(),
            }
        };
        info!(
            "[replica {}] Entering round {} ({}, timer {:?})",
            self.author, round, reason, timer.duration
        );
        NewRoundEvent {
            round,
            reason,
            timeout_duration: timer.duration,
        }
    }
}

/// Builder for creating a pacemaker.
pub struct PacemakerBuilder {
    config: PacemakerConfig,
}

impl Default for PacemakerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacemakerBuilder {
    /// Create a new pacemaker builder.
    pub fn new() -> Self {
        Self {
            config: PacemakerConfig::default(),
        }
    }

    pub fn from_config(config: PacemakerConfig) -> Self {
        Self { config }
    }

    /// Set the message delay estimate.
    pub fn gst_estimate_ms(mut self, delay_ms: u64) -> Self {
        self.config.gst_estimate_ms = delay_ms;
        self
    }

    pub fn timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.config.timeout_multiplier = multiplier;
        self
    }

    /// Set the exponent base.
    pub fn exponent_base(mut self, base: f64) -> Self {
        self.config.exponent_base = base;
        self
    }

    /// Set the max exponent.
    pub fn max_exponent(mut self, max: usize) -> Self {
        self.config.max_exponent = max;
        self
    }

    /// Set the initial round.
    pub fn initial_round(mut self, round: Round) -> Self {
        self.config.initial_round = round;
        self
    }

    /// Build the pacemaker with an exponential interval strategy.
    pub fn build(self, author: ReplicaId, fault_tolerance: usize) -> Pacemaker {
        let strategy = ExponentialIntervalStrategy::from_config(&self.config);
        Pacemaker::new(author, fault_tolerance, strategy, &self.config)
    }
}
