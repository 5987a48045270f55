// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Ed25519 implementation of the signer and verifier traits.

use consensus_traits::{ReplicaId, Signature, ValidatorSigner, ValidatorVerifier, VerifyError};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use std::fmt;

/// Holds the private key of one replica.
pub struct Ed25519Signer {
    author: ReplicaId,
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(author: ReplicaId, signing_key: SigningKey) -> Self {
        Self {
            author,
            signing_key,
        }
    }

    /// Derive a key deterministically from a shared cluster seed.
    ///
    /// Only suitable for local clusters and tests.
    pub fn from_seed(author: ReplicaId, seed: u64) -> Self {
        let mut material = Vec::with_capacity(24);
        material.extend_from_slice(b"replica-key");
        material.extend_from_slice(&seed.to_le_bytes());
        material.extend_from_slice(&author.0.to_le_bytes());
        let secret = *blake3::hash(&material).as_bytes();
        Self::new(author, SigningKey::from_bytes(&secret))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl ValidatorSigner for Ed25519Signer {
    fn author(&self) -> ReplicaId {
        self.author
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature::new(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

/// Public keys of the validator set, indexed by [`ReplicaId`].
#[derive(Clone, Debug)]
pub struct ValidatorSet {
    keys: Vec<VerifyingKey>,
}

impl ValidatorSet {
    pub fn new(keys: Vec<VerifyingKey>) -> Self {
        Self { keys }
    }

    /// Generate `n` deterministic signers and the matching validator set.
    pub fn generate(n: usize, seed: u64) -> (Self, Vec<Ed25519Signer>) {
        let signers: Vec<Ed25519Signer> = (0..n as u32)
            .map(|index| Ed25519Signer::from_seed(ReplicaId(index), seed))
            .collect();
        let keys = signers.iter().map(Ed25519Signer::verifying_key).collect();
        (Self::new(keys), signers)
    }

    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        (0..self.keys.len() as u32).map(ReplicaId)
    }
}

impl ValidatorVerifier for ValidatorSet {
    fn verify(
        &self,
        author: ReplicaId,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), VerifyError> {
        let key = self
            .keys
            .get(author.index())
            .ok_or(VerifyError::UnknownAuthor(author))?;
        let signature = ed25519_dalek::Signature::from_slice(signature.as_bytes())
            .map_err(|_| VerifyError::InvalidSignature(author))?;
        key.verify_strict(message, &signature)
            .map_err(|_| VerifyError::InvalidSignature(author))
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}
