// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core identifiers for consensus.
//!
//! Replicas are addressed by a small integer index into the validator set,
//! content is addressed by a 32 byte blake3 digest and signatures are opaque
//! byte strings produced by a [`ValidatorSigner`](crate::ValidatorSigner).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for consensus operations.
pub type Error = anyhow::Error;

/// Errors possible during signature and certificate verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Author {0} is unknown")]
    UnknownAuthor(ReplicaId),

    #[error("Signature verification failed for {0}")]
    InvalidSignature(ReplicaId),

    #[error("Signer {0} appears more than once")]
    DuplicateSigner(ReplicaId),

    #[error("Too few signatures: got {got}, required {required}")]
    TooFewSignatures { got: usize, required: usize },

    #[error("Vote info hash does not match the vote info")]
    InvalidVoteInfoHash,

    #[error("Block id does not match the block contents")]
    InvalidBlockId,

    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),
}

/// Index of a replica in the validator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub u32);

impl ReplicaId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of this replica in the validator set.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

/// A 32 byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashValue([u8; HashValue::LENGTH]);

impl HashValue {
    pub const LENGTH: usize = 32;

    pub const fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// The all-zero digest, used as the state of the empty ledger.
    pub const fn zero() -> Self {
        Self([0u8; Self::LENGTH])
    }

    /// Hash arbitrary bytes with blake3.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let array: [u8; Self::LENGTH] = bytes.try_into().map_err(|_| {
            anyhow::anyhow!(
                "Invalid hash length: expected {}, got {}",
                Self::LENGTH,
                bytes.len()
            )
        })?;
        Ok(Self(array))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex_str)?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes in hex, for log lines.
    pub fn short_str(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self.short_str())
    }
}

/// An opaque signature over a canonical encoding.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(4)];
        write!(f, "Signature({})", hex::encode(prefix))
    }
}
