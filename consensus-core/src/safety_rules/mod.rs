// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Safety rules for Byzantine fault-tolerant consensus.
//!
//! The only component allowed to sign votes and timeouts. It enforces the
//! voting and timeout rules over a persisted [`SafetyStateData`].

mod error;
mod recovery;
mod rules;
mod state;

pub use error::SafetyError;
pub use recovery::{
    load_safety_rules, FileSafetyStorage, InMemorySafetyStorage, RecoveryError,
    SAFETY_STATE_FILE,
};
pub use rules::{build_vote_data, SafetyRules};
pub use state::SafetyStateData;
