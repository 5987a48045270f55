// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Liveness components for consensus.
//!
//! This module contains components that ensure the consensus system makes progress
//! even with network issues or failing validators.
//!
//! ## Structure
//!
//! - **pacemaker**: Round timeout and progression management
//! - **leader_election**: Round-robin and reputation-based leader election

pub mod leader_election;
pub mod pacemaker;

// Re-export commonly used types
pub use leader_election::{LeaderElection, LeaderElectionConfig, RoundRobinProposer};
pub use pacemaker::{
    ExponentialIntervalStrategy, NewRoundEvent, NewRoundReason, Pacemaker, PacemakerBuilder,
    PacemakerConfig, RemoteTimeoutOutcome, RoundIntervalStrategy, RoundTimer,
};
