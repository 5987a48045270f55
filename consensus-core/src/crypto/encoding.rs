// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Canonical byte encodings for hashing and signing.
//!
//! Every encoding starts with [`ENCODING_VERSION`] followed by a [`Domain`]
//! tag, so that two structures with identical fields never share a digest.
//! Integers are little-endian with a fixed width, variable length data is
//! prefixed with its `u32` length and optional values carry a one byte tag.
//! The layout does not depend on any serializer, so replicas written in other
//! languages can reproduce it.

use consensus_traits::HashValue;

/// Version byte prefixed to every canonical encoding.
pub const ENCODING_VERSION: u8 = 1;

/// Domain separation tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Domain {
    BlockId = 1,
    VoteInfo = 2,
    LedgerCommitInfo = 3,
    TimeoutInfo = 4,
    Proposal = 5,
    QuorumCertAuthor = 6,
    SpeculativeState = 7,
    TimeoutMsgId = 8,
}

/// Incremental builder of a canonical encoding.
#[derive(Debug)]
pub struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    pub fn new(domain: Domain) -> Self {
        let mut buf = Vec::with_capacity(128);
        buf.push(ENCODING_VERSION);
        buf.push(domain as u8);
        Self { buf }
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Length-prefixed bytes.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.len_prefix(value.len());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub fn hash(&mut self, value: &HashValue) -> &mut Self {
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn opt_hash(&mut self, value: Option<&HashValue>) -> &mut Self {
        match value {
            Some(hash) => {
                self.buf.push(1);
                self.hash(hash)
            },
            None => {
                self.buf.push(0);
                self
            },
        }
    }

    pub fn len_prefix(&mut self, len: usize) -> &mut Self {
        // Lengths beyond u32 cannot occur for in-memory consensus objects.
        self.u32(u32::try_from(len).unwrap_or(u32::MAX))
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn digest(&mut self) -> HashValue {
        HashValue::digest(&self.buf)
    }
}

/// Structures with a canonical encoding.
pub trait CanonicalEncode {
    /// Versioned, domain-tagged encoding.
    fn canonical_bytes(&self) -> Vec<u8>;

    /// blake3 digest of [`canonical_bytes`](Self::canonical_bytes).
    fn hash(&self) -> HashValue {
        HashValue::digest(&self.canonical_bytes())
    }
}
