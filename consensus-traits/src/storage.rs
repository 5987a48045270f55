// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Durable storage boundaries.
//!
//! Two things must survive a crash: the safety state that guards against
//! equivocation, and the ordered log of committed commands.

use crate::core::Error;

/// Storage for the safety state of a replica.
///
/// `save_safety_state` must not return before the state is durable. A replica
/// only emits a vote or a timeout after the call succeeded.
pub trait SafetyStorage<S>: Send {
    /// Persist the safety state.
    fn save_safety_state(&mut self, state: &S) -> Result<(), Error>;

    /// Load the last persisted safety state, `None` on first start.
    fn load_safety_state(&self) -> Result<Option<S>, Error>;
}

/// Append-only log of committed commands.
pub trait CommitLog: Send {
    /// Append the commands of one committed block in order.
    ///
    /// Must flush to durable storage before returning.
    fn append(&mut self, commands: &[&str]) -> std::io::Result<()>;
}
