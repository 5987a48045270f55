// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic utilities for consensus.
//!
//! Canonical encodings of every signed or hashed structure, an Ed25519
//! implementation of the signer and verifier traits, and signature aggregation
//! for certificate formation.

mod ed25519;
mod encoding;
mod signature_aggregator;

pub use ed25519::{Ed25519Signer, ValidatorSet};
pub use encoding::{CanonicalEncode, CanonicalWriter, Domain, ENCODING_VERSION};
pub use signature_aggregator::SignatureAggregator;
