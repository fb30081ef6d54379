use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::atomic_file::write_atomic;
use crate::contour::Contour;
use crate::error::{Result, SolverError};

/// On-disk snapshot of a split run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct ProgressState {
    /// SHA-256 of the metadata file the run was started with.
    metadata_digest: String,
    /// First portal index that has not been fully recorded.
    index: usize,
    match_cnts: Vec<(usize, Contour)>,
}

/// Resumable progress of the per-portal loop.
///
/// Opening compares the saved snapshot with the current metadata file. The snapshot is
/// reused only when the metadata is byte-for-byte the same. Mutations stay in memory
/// until the state is committed or dropped; both write the snapshot atomically when
/// progress saving is enabled. Dropping therefore covers error returns and unwinding.
pub struct MatchState {
    state_path: PathBuf,
    save_progress: bool,
    resumed: bool,
    committed: bool,
    state: ProgressState,
}

impl MatchState {
    /// # Errors
    /// [`SolverError::MissingInput`] when the metadata file does not exist.
    pub fn open(state_path: &Path, metadata_path: &Path, save_progress: bool) -> Result<MatchState> {
        if !metadata_path.exists() {
            return Err(SolverError::MissingInput(metadata_path.to_path_buf()));
        }
        let metadata_digest = file_digest(metadata_path)?;

        if !save_progress && state_path.exists() {
            debug!("Progress saving disabled, removing {}", state_path.display());
            fs::remove_file(state_path)?;
        }

        let saved = if state_path.exists() {
            match load_state(state_path) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Ignoring unreadable progress file {}: {e}", state_path.display());
                    None
                }
            }
        } else {
            None
        };

        let (state, resumed) = match saved {
            Some(state) if state.metadata_digest == metadata_digest => {
                info!("Resuming from portal {} with {} matches", state.index, state.match_cnts.len());
                (state, true)
            }
            _ => (
                ProgressState {
                    metadata_digest,
                    index: 0,
                    match_cnts: Vec::new(),
                },
                false,
            ),
        };

        Ok(MatchState {
            state_path: state_path.to_path_buf(),
            save_progress,
            resumed,
            committed: false,
            state,
        })
    }

    /// Whether a previous snapshot for the same metadata was picked up.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// First portal index still to process.
    pub fn index(&self) -> usize {
        self.state.index
    }

    pub fn match_cnts(&self) -> &[(usize, Contour)] {
        &self.state.match_cnts
    }

    pub fn save_index(&mut self, index: usize) {
        self.state.index = index;
    }

    pub fn save_cnt(&mut self, portal_index: usize, contour: Contour) {
        self.state.match_cnts.push((portal_index, contour));
    }

    /// Writes the snapshot now, if progress saving is enabled.
    pub fn persist(&self) -> Result<()> {
        if !self.save_progress {
            return Ok(());
        }
        let bytes = bincode::serde::encode_to_vec(&self.state, bincode::config::standard())?;
        write_atomic(&self.state_path, &bytes)
    }

    /// Persists the final snapshot and hands back the accumulated matches.
    pub fn commit(mut self) -> Result<Vec<(usize, Contour)>> {
        self.committed = true;
        self.persist()?;
        Ok(std::mem::take(&mut self.state.match_cnts))
    }
}

impl Drop for MatchState {
    fn drop(&mut self) {
        if self.committed || !self.save_progress {
            return;
        }
        match self.persist() {
            Ok(()) => info!("Progress saved at portal {}", self.state.index),
            Err(e) => error!("Failed to save progress to {}: {e}", self.state_path.display()),
        }
    }
}

fn load_state(path: &Path) -> Result<ProgressState> {
    let bytes = fs::read(path)?;
    let (state, _): (ProgressState, usize) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(state)
}

/// Hex encoded SHA-256 of a file's content.
pub fn file_digest(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
