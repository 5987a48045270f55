// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Safety state for consensus rules.
//!
//! The two rounds that must survive a restart so that a replica never votes
//! twice in a round and never votes against a certificate it already acted
//! upon.

use crate::types::{Round, NIL_ROUND};
use serde::{Deserialize, Serialize};

/// Persistent voting state of a replica.
///
/// # Safety Invariants
///
/// 1. `highest_vote_round` only increases
/// 2. `highest_qc_round` only increases
/// 3. `highest_qc_round < highest_vote_round` once the replica voted
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SafetyStateData {
    /// Highest round this replica voted or timed out in
    pub highest_vote_round: Round,

    /// Highest parent certificate round of a block this replica voted for
    pub highest_qc_round: Round,
}

impl Default for SafetyStateData {
    fn default() -> Self {
        Self {
            highest_vote_round: NIL_ROUND,
            highest_qc_round: NIL_ROUND,
        }
    }
}

impl SafetyStateData {
    pub fn new(highest_vote_round: Round, highest_qc_round: Round) -> Self {
        Self {
            highest_vote_round,
            highest_qc_round,
        }
    }

    /// Raise the highest vote round. Returns true if it changed.
    pub fn increase_highest_vote_round(&mut self, round: Round) -> bool {
        if round > self.highest_vote_round {
            self.highest_vote_round = round;
            true
        } else {
            false
        }
    }

    /// Raise the highest qc round. Returns true if it changed.
    pub fn update_highest_qc_round(&mut self, round: Round) -> bool {
        if round > self.highest_qc_round {
            self.highest_qc_round = round;
            true
        } else {
            false
        }
    }

    /// True before the first vote or timeout.
    pub fn is_initial(&self) -> bool {
        self.highest_vote_round == NIL_ROUND && self.highest_qc_round == NIL_ROUND
    }
}

impl std::fmt::Display for SafetyStateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SafetyState[highest_vote_round: {}, highest_qc_round: {}]",
            self.highest_vote_round, self.highest_qc_round
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SafetyStateData::default();
        assert_eq!(state.highest_vote_round, NIL_ROUND);
        assert_eq!(state.highest_qc_round, NIL_ROUND);
        assert!(state.is_initial());
    }

    #[test]
    fn test_rounds_only_increase() {
        let mut state = SafetyStateData::default();
        assert!(state.increase_highest_vote_round(3));
        assert!(!state.increase_highest_vote_round(2));
        assert!(!state.increase_highest_vote_round(3));
        assert_eq!(state.highest_vote_round, 3);

        assert!(state.update_highest_qc_round(1));
        assert!(!state.update_highest_qc_round(0));
        assert_eq!(state.highest_qc_round, 1);
        assert!(!state.is_initial());
    }

    #[test]
    fn test_display() {
        let state = SafetyStateData::new(5, 4);
        assert_eq!(
            state.to_string(),
            "SafetyState[highest_vote_round: 5, highest_qc_round: 4]"
        );
    }
}
