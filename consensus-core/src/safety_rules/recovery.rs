// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Safety state storage and recovery.
//!
//! A replica that restarts must resume with the safety state it last acted
//! on, otherwise it could vote twice in a round.

use consensus_traits::{core::Error, SafetyStorage, ValidatorSigner, ValidatorVerifier};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{SafetyRules, SafetyStateData};
use crate::types::NIL_ROUND;

/// Recovery error types.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Storage error during recovery
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation error
    #[error("Safety state validation failed: {0}")]
    Validation(String),
}

/// File name of the persisted safety state inside a data directory.
pub const SAFETY_STATE_FILE: &str = "safety_state.bin";

/// Safety state kept in a single file, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct FileSafetyStorage {
    path: PathBuf,
}

impl FileSafetyStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at [`SAFETY_STATE_FILE`] inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SAFETY_STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SafetyStorage<SafetyStateData> for FileSafetyStorage {
    fn save_safety_state(&mut self, state: &SafetyStateData) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(state)?;
        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn load_safety_state(&self) -> Result<Option<SafetyStateData>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}

/// Safety state kept in memory.
///
/// Clones share the same slot, so a test can hand one clone to a replica
/// and inspect or reuse the state through another. Writes can be made to
/// fail for fault injection.
#[derive(Clone, Debug, Default)]
pub struct InMemorySafetyStorage {
    state: Arc<Mutex<Option<SafetyStateData>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemorySafetyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SafetyStateData) -> Self {
        let storage = Self::new();
        if let Ok(mut slot) = storage.state.lock() {
            *slot = Some(state);
        }
        storage
    }

    /// Make subsequent saves fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The last successfully saved state.
    pub fn current(&self) -> Option<SafetyStateData> {
        self.state.lock().ok().and_then(|slot| *slot)
    }
}

impl SafetyStorage<SafetyStateData> for InMemorySafetyStorage {
    fn save_safety_state(&mut self, state: &SafetyStateData) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Storage error: writes disabled"));
        }
        let mut slot = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Storage error: lock poisoned"))?;
        *slot = Some(*state);
        Ok(())
    }

    fn load_safety_state(&self) -> Result<Option<SafetyStateData>, Error> {
        let slot = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Storage error: lock poisoned"))?;
        Ok(*slot)
    }
}

/// Load the safety state from storage and build the safety rules around it.
///
/// Starts from the initial state when storage is empty.
pub fn load_safety_rules(
    storage: Box<dyn SafetyStorage<SafetyStateData>>,
    signer: Arc<dyn ValidatorSigner>,
    verifier: Arc<dyn ValidatorVerifier>,
) -> Result<SafetyRules, RecoveryError> {
    let author = signer.author();
    match storage.load_safety_state() {
        Ok(Some(state)) => {
            validate_safety_state(&state)?;
            log::info!("[replica {}] Recovered {}", author, state);
            Ok(SafetyRules::with_state(state, signer, verifier, storage))
        },
        Ok(None) => {
            log::info!("[replica {}] No safety state found in storage, starting fresh", author);
            Ok(SafetyRules::new(signer, verifier, storage))
        },
        Err(e) => Err(RecoveryError::Storage(e.to_string())),
    }
}

/// Validate the safety state for consistency.
fn validate_safety_state(state: &SafetyStateData) -> Result<(), RecoveryError> {
    if state.highest_vote_round < NIL_ROUND || state.highest_qc_round < NIL_ROUND {
        return Err(RecoveryError::Validation(format!(
            "Invalid state: rounds below {}: {}",
            NIL_ROUND, state
        )));
    }

    // A vote always extends a lower certificate round
    if !state.is_initial() && state.highest_qc_round >= state.highest_vote_round {
        return Err(RecoveryError::Validation(format!(
            "Invalid state: highest_qc_round ({}) >= highest_vote_round ({})",
            state.highest_qc_round, state.highest_vote_round
        )));
    }

    Ok(())
}
