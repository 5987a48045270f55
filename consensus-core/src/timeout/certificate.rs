// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Timeout messages and timeout certificates.

use crate::crypto::{CanonicalWriter, Domain};
use crate::quorum_cert::{qc_round, QuorumCert};
use crate::types::{Round, NIL_ROUND};
use consensus_traits::{
    HashValue, ReplicaId, Signature, ValidatorSigner, ValidatorVerifier, VerifyError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A replica's signed statement that it gave up on `round`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    pub round: Round,
    /// Highest certificate known to the sender.
    pub high_qc: Option<QuorumCert>,
    pub sender: ReplicaId,
    /// Signature over `(round, high_qc.round)`.
    pub signature: Signature,
}

impl TimeoutInfo {
    pub fn new(round: Round, high_qc: Option<QuorumCert>, signer: &dyn ValidatorSigner) -> Self {
        let signature = signer.sign(&Self::signing_bytes(round, qc_round(high_qc.as_ref())));
        Self {
            round,
            high_qc,
            sender: signer.author(),
            signature,
        }
    }

    /// Bytes signed by a timeout for `round` carrying a certificate of
    /// `high_qc_round`. Timeout certificates are verified against the same
    /// encoding.
    pub fn signing_bytes(round: Round, high_qc_round: Round) -> Vec<u8> {
        CanonicalWriter::new(Domain::TimeoutInfo)
            .i64(round)
            .i64(high_qc_round)
            .finish()
    }

    pub fn high_qc_round(&self) -> Round {
        qc_round(self.high_qc.as_ref())
    }

    /// Verify the sender's signature. The carried certificate is verified
    /// separately.
    pub fn verify(&self, verifier: &dyn ValidatorVerifier) -> Result<(), VerifyError> {
        verifier.verify(
            self.sender,
            &Self::signing_bytes(self.round, self.high_qc_round()),
            &self.signature,
        )
    }
}

/// 2f+1 timeouts for the same round.
///
/// `tmo_high_qc_rounds[i]` is the high certificate round reported by the
/// signer of `tmo_signatures[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub round: Round,
    pub tmo_high_qc_rounds: Vec<Round>,
    pub tmo_signatures: Vec<(ReplicaId, Signature)>,
}

impl TimeoutCertificate {
    /// Assemble a certificate from timeouts that all target `round`.
    pub fn new<'a>(round: Round, timeouts: impl IntoIterator<Item = &'a TimeoutInfo>) -> Self {
        let mut tmo_high_qc_rounds = Vec::new();
        let mut tmo_signatures = Vec::new();
        for timeout in timeouts {
            tmo_high_qc_rounds.push(timeout.high_qc_round());
            tmo_signatures.push((timeout.sender, timeout.signature.clone()));
        }
        Self {
            round,
            tmo_high_qc_rounds,
            tmo_signatures,
        }
    }

    /// Highest certificate round reported by any signer.
    pub fn max_high_qc_round(&self) -> Round {
        self.tmo_high_qc_rounds
            .iter()
            .copied()
            .max()
            .unwrap_or(NIL_ROUND)
    }

    pub fn signers(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.tmo_signatures.iter().map(|(author, _)| *author)
    }

    /// Every entry must carry a valid signature over `(round, high_qc_round)`
    /// from a distinct replica, and there must be at least 2f+1 entries.
    pub fn verify(&self, verifier: &dyn ValidatorVerifier) -> Result<(), VerifyError> {
        if self.tmo_high_qc_rounds.len() != self.tmo_signatures.len() {
            return Err(VerifyError::MalformedCertificate(format!(
                "{} high qc rounds for {} signatures",
                self.tmo_high_qc_rounds.len(),
                self.tmo_signatures.len()
            )));
        }
        let required = verifier.quorum_size();
        if self.tmo_signatures.len() < required {
            return Err(VerifyError::TooFewSignatures {
                got: self.tmo_signatures.len(),
                required,
            });
        }
        let mut seen = HashSet::with_capacity(self.tmo_signatures.len());
        for ((author, signature), high_qc_round) in
            self.tmo_signatures.iter().zip(&self.tmo_high_qc_rounds)
        {
            if !seen.insert(*author) {
                return Err(VerifyError::DuplicateSigner(*author));
            }
            if *high_qc_round >= self.round {
                return Err(VerifyError::MalformedCertificate(format!(
                    "high qc round {} is not below timeout round {}",
                    high_qc_round, self.round
                )));
            }
            verifier.verify(
                *author,
                &TimeoutInfo::signing_bytes(self.round, *high_qc_round),
                signature,
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for TimeoutCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TC[round: {}, signers: {}, max_hqc: {}]",
            self.round,
            self.tmo_signatures.len(),
            self.max_high_qc_round()
        )
    }
}

/// Round of an optional timeout certificate, [`NIL_ROUND`] if absent.
pub fn tc_round(tc: Option<&TimeoutCertificate>) -> Round {
    tc.map_or(NIL_ROUND, |tc| tc.round)
}

/// Broadcast by a replica whose round timer fired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {
    pub tmo_info: TimeoutInfo,
    /// Certificate that let the sender enter `tmo_info.round`, if any.
    pub last_round_tc: Option<TimeoutCertificate>,
    pub high_commit_qc: Option<QuorumCert>,
    /// Digest identifying this message for deduplication.
    pub id: HashValue,
}

impl TimeoutMsg {
    pub fn new(
        tmo_info: TimeoutInfo,
        last_round_tc: Option<TimeoutCertificate>,
        high_commit_qc: Option<QuorumCert>,
    ) -> Self {
        let id = CanonicalWriter::new(Domain::TimeoutMsgId)
            .i64(tmo_info.round)
            .i64(tmo_info.high_qc_round())
            .u32(tmo_info.sender.0)
            .bytes(tmo_info.signature.as_bytes())
            .digest();
        Self {
            tmo_info,
            last_round_tc,
            high_commit_qc,
            id,
        }
    }

    pub fn round(&self) -> Round {
        self.tmo_info.round
    }

    pub fn sender(&self) -> ReplicaId {
        self.tmo_info.sender
    }
}

impl fmt::Display for TimeoutMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timeout[round: {}, sender: {}, hqc: {}]",
            self.tmo_info.round,
            self.tmo_info.sender,
            self.tmo_info.high_qc_round()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ValidatorSet;

    fn timeouts(round: Round, hqc_rounds: &[Round]) -> (ValidatorSet, Vec<TimeoutInfo>) {
        let (validators, signers) = ValidatorSet::generate(4, 5);
        let infos = hqc_rounds
            .iter()
            .zip(&signers)
            .map(|(hqc, signer)| {
                let signature = signer.sign(&TimeoutInfo::signing_bytes(round, *hqc));
                TimeoutInfo {
                    round,
                    high_qc: None,
                    sender: signer.author(),
                    signature,
                }
            })
            .collect();
        (validators, infos)
    }

    #[test]
    fn test_timeout_info_verifies() {
        let (validators, signers) = ValidatorSet::generate(4, 5);
        let info = TimeoutInfo::new(3, None, &signers[1]);
        assert_eq!(info.high_qc_round(), NIL_ROUND);
        assert!(info.verify(&validators).is_ok());

        let mut forged = info.clone();
        forged.round = 4;
        assert_eq!(
            forged.verify(&validators),
            Err(VerifyError::InvalidSignature(ReplicaId(1)))
        );
    }

    #[test]
    fn test_certificate_verifies_each_entry() {
        let (validators, infos) = timeouts(5, &[2, 3, 1]);
        let tc = TimeoutCertificate::new(5, &infos);
        assert_eq!(tc.max_high_qc_round(), 3);
        assert!(tc.verify(&validators).is_ok());

        // Claiming a different high qc round breaks that entry's signature
        let mut forged = tc.clone();
        forged.tmo_high_qc_rounds[1] = 4;
        assert_eq!(
            forged.verify(&validators),
            Err(VerifyError::InvalidSignature(ReplicaId(1)))
        );
    }

    #[test]
    fn test_certificate_requires_quorum() {
        let (validators, infos) = timeouts(5, &[2, 3]);
        let tc = TimeoutCertificate::new(5, &infos);
        assert_eq!(
            tc.verify(&validators),
            Err(VerifyError::TooFewSignatures {
                got: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_certificate_rejects_mismatched_lengths() {
        let (validators, infos) = timeouts(5, &[2, 3, 1]);
        let mut tc = TimeoutCertificate::new(5, &infos);
        tc.tmo_high_qc_rounds.pop();
        assert!(matches!(
            tc.verify(&validators),
            Err(VerifyError::MalformedCertificate(_))
        ));
    }

    #[test]
    fn test_timeout_msg_id_depends_on_sender() {
        let (_, signers) = ValidatorSet::generate(4, 5);
        let a = TimeoutMsg::new(TimeoutInfo::new(2, None, &signers[0]), None, None);
        let b = TimeoutMsg::new(TimeoutInfo::new(2, None, &signers[1]), None, None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.round(), 2);
        assert_eq!(a.sender(), ReplicaId(0));
    }
}
