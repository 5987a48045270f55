// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # DiemBFT Consensus Traits
//!
//! Primitive identifiers and the collaborator boundaries of the consensus core.
//!
//! The consensus core is a single-threaded state machine. Everything it needs
//! from the outside world is expressed here as a trait:
//!
//! - **Identity**: [`ReplicaId`], [`HashValue`], [`Signature`]
//! - **Crypto**: [`ValidatorSigner`], [`ValidatorVerifier`]
//! - **Storage**: [`SafetyStorage`] for the durable voting state, [`CommitLog`]
//!   for the append-only ledger file
//! - **Network**: [`ConsensusNetwork`] for point-to-point and broadcast delivery
//! - **Mempool**: [`TransactionPool`], [`PoolTransaction`]
//!
//! ## License
//!
//! Licensed under the Apache License, Version 2.0 (LICENSE or http://www.apache.org/licenses/LICENSE-2.0)

pub mod core;
pub mod crypto;
pub mod mempool;
pub mod network;
pub mod storage;

pub use core::{HashValue, ReplicaId, Signature, VerifyError};
pub use crypto::{ValidatorSigner, ValidatorVerifier};
pub use mempool::{PoolTransaction, TransactionPool};
pub use network::ConsensusNetwork;
pub use storage::{CommitLog, SafetyStorage};

/// Result type alias for consensus operations.
pub type Result<T> = std::result::Result<T, core::Error>;
