// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # DiemBFT Consensus Core Library
//!
//! A chained-HotStuff consensus replica: blocks are certified by quorum
//! certificates, a certificate on three blocks of consecutive rounds commits
//! the oldest one, and stalled rounds are left through timeout certificates.
//!
//! ## Architecture
//!
//! - [`ledger`] - speculative execution and the committed chain
//! - [`block_tree`] - pending blocks, vote aggregation and the commit rule
//! - [`safety_rules`] - voting and timeout rules with durable state
//! - [`liveness`] - pacemaker and leader election
//! - [`round_manager`] - the event-driven protocol driver
//! - [`runtime`] - async event loop, round timer and in-process network
//! - [`crypto`] - canonical encoding and ed25519 signatures
//!
//! Collaborators such as the network, the mempool and persistent storage are
//! defined as traits in `consensus-traits`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use consensus_core::{ConsensusConfig, RoundManager, ValidatorSet};
//! use consensus_traits::{ValidatorSigner, ValidatorVerifier};
//!
//! let (validators, signers) = ValidatorSet::generate(4, 42);
//! let verifier: Arc<dyn ValidatorVerifier> = Arc::new(validators);
//! let signer: Arc<dyn ValidatorSigner> = Arc::new(signers.into_iter().next().unwrap());
//! let mut replica = RoundManager::from_config(ConsensusConfig::new(0, 4), signer, verifier)?;
//! let proposal = replica.process_new_round_event(None);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod block;
pub mod block_tree;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod liveness;
pub mod mempool;
pub mod proposal;
pub mod quorum_cert;
pub mod round_manager;
pub mod runtime;
pub mod safety_rules;
pub mod testing;
pub mod timeout;
pub mod types;
pub mod votes;

// Re-export commonly used types
pub use block::Block;
pub use block_tree::BlockTree;
pub use config::ConsensusConfig;
pub use crypto::{Ed25519Signer, ValidatorSet};
pub use error::ConsensusError;
pub use ledger::Ledger;
pub use mempool::Mempool;
pub use quorum_cert::QuorumCert;
pub use round_manager::{ProposalDecision, ProposalOutcome, ProposalRejection, RoundManager};
pub use runtime::{ConsensusEvent, ConsensusMessage, LocalNetwork, ReplicaRuntime};
pub use safety_rules::{SafetyError, SafetyRules, SafetyStateData};
pub use timeout::{TimeoutCertificate, TimeoutMsg};
pub use types::{Round, Transaction, TxnId};

/// Error type for collaborator operations
pub use consensus_traits::core::Error;

/// Version of the consensus protocol implemented by this library
pub const PROTOCOL_VERSION: &str = "0.1.0";
