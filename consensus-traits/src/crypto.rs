// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Signing and verification boundaries.

use crate::core::{ReplicaId, Signature, VerifyError};
use std::collections::HashSet;

/// Produces signatures on behalf of one replica.
pub trait ValidatorSigner: Send + Sync {
    /// The replica whose key this signer holds.
    fn author(&self) -> ReplicaId;

    /// Sign a canonical encoding.
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Verifies signatures against the public keys of the validator set.
pub trait ValidatorVerifier: Send + Sync {
    /// Verify a single signature by `author` over `message`.
    fn verify(
        &self,
        author: ReplicaId,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), VerifyError>;

    /// Number of validators.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, author: ReplicaId) -> bool {
        author.index() < self.len()
    }

    /// Maximum number of Byzantine replicas tolerated, `f = (n - 1) / 3`.
    fn fault_tolerance(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Certificate threshold, `2f + 1`.
    fn quorum_size(&self) -> usize {
        2 * self.fault_tolerance() + 1
    }

    /// Verify a set of signatures that all sign the same message.
    ///
    /// Rejects duplicate signers and sets smaller than `required`.
    fn verify_multi(
        &self,
        message: &[u8],
        signatures: &[(ReplicaId, Signature)],
        required: usize,
    ) -> Result<(), VerifyError> {
        let mut seen = HashSet::with_capacity(signatures.len());
        for (author, _) in signatures {
            if !seen.insert(*author) {
                return Err(VerifyError::DuplicateSigner(*author));
            }
        }
        if signatures.len() < required {
            return Err(VerifyError::TooFewSignatures {
                got: signatures.len(),
                required,
            });
        }
        for (author, signature) in signatures {
            self.verify(*author, message, signature)?;
        }
        Ok(())
    }
}
