// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Timeout types for consensus round advancement.
//!
//! When a round makes no progress every replica broadcasts a signed timeout.
//! 2f+1 timeouts for the same round form a timeout certificate, which lets
//! the next leader propose even though the round produced no certificate.

mod certificate;

pub use certificate::{tc_round, TimeoutCertificate, TimeoutInfo, TimeoutMsg};
