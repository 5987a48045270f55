// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Signature aggregation for certificate formation.

use consensus_traits::{ReplicaId, Signature, VerifyError};
use std::collections::BTreeMap;

/// Collects at most one signature per replica.
///
/// Signatures are kept ordered by signer so that a certificate built from the
/// same set of votes has the same encoding regardless of arrival order.
#[derive(Clone, Debug, Default)]
pub struct SignatureAggregator {
    signatures: BTreeMap<ReplicaId, Signature>,
}

impl SignatureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature. Returns `false` if this replica already signed.
    pub fn add_signature(&mut self, author: ReplicaId, signature: Signature) -> bool {
        if self.signatures.contains_key(&author) {
            return false;
        }
        self.signatures.insert(author, signature);
        true
    }

    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn has_signed(&self, author: &ReplicaId) -> bool {
        self.signatures.contains_key(author)
    }

    pub fn signers(&self) -> impl Iterator<Item = &ReplicaId> {
        self.signatures.keys()
    }

    /// Check that at least `required` replicas signed.
    pub fn check_quorum(&self, required: usize) -> Result<(), VerifyError> {
        if self.signatures.len() < required {
            return Err(VerifyError::TooFewSignatures {
                got: self.signatures.len(),
                required,
            });
        }
        Ok(())
    }

    /// The collected signatures in signer order.
    pub fn signatures(&self) -> Vec<(ReplicaId, Signature)> {
        self.signatures
            .iter()
            .map(|(author, signature)| (*author, signature.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(byte: u8) -> Signature {
        Signature::new(vec![byte; 4])
    }

    #[test]
    fn test_duplicate_signer_is_ignored() {
        let mut aggregator = SignatureAggregator::new();
        assert!(aggregator.add_signature(ReplicaId(1), sig(1)));
        assert!(!aggregator.add_signature(ReplicaId(1), sig(9)));
        assert_eq!(aggregator.signer_count(), 1);
        assert!(aggregator.has_signed(&ReplicaId(1)));
        assert_eq!(aggregator.signatures()[0].1, sig(1));
    }

    #[test]
    fn test_signatures_are_ordered_by_signer() {
        let mut aggregator = SignatureAggregator::new();
        aggregator.add_signature(ReplicaId(3), sig(3));
        aggregator.add_signature(ReplicaId(0), sig(0));
        aggregator.add_signature(ReplicaId(2), sig(2));
        let signers: Vec<_> = aggregator.signatures().into_iter().map(|(a, _)| a).collect();
        assert_eq!(signers, vec![ReplicaId(0), ReplicaId(2), ReplicaId(3)]);
    }

    #[test]
    fn test_check_quorum() {
        let mut aggregator = SignatureAggregator::new();
        aggregator.add_signature(ReplicaId(0), sig(0));
        aggregator.add_signature(ReplicaId(1), sig(1));
        assert_eq!(
            aggregator.check_quorum(3),
            Err(VerifyError::TooFewSignatures {
                got: 2,
                required: 3
            })
        );
        aggregator.add_signature(ReplicaId(2), sig(2));
        assert!(aggregator.check_quorum(3).is_ok());
    }
}
