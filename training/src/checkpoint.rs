use crate::error::{Result, TrainingError};
use log::info;
use neural_network::Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of a model together with the test accuracy it reached and the
/// epoch it was taken at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub network: Network,
    /// Test accuracy in percent
    pub acc: f64,
    pub epoch: usize,
}

impl Checkpoint {
    pub fn new(network: Network, acc: f64, epoch: usize) -> Self {
        Self {
            network,
            acc,
            epoch,
        }
    }

    /// Writes the checkpoint as JSON to `dir/file`, creating `dir` if needed.
    pub fn save(&self, dir: impl AsRef<Path>, file: &str) -> Result<PathBuf> {
        save_checkpoint(&self.network, self.acc, self.epoch, dir.as_ref(), file)
    }

    /// Reads a checkpoint written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// [`TrainingError::MissingCheckpointDir`] when the directory holding
    /// `path` does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.is_dir() {
            return Err(TrainingError::MissingCheckpointDir(dir.to_path_buf()));
        }

        let json = fs::read_to_string(path)?;
        let mut checkpoint: Checkpoint = serde_json::from_str(&json)?;
        checkpoint.network.config().validate()?;
        // Gradient buffers are not stored.
        checkpoint.network.zero_grad();
        Ok(checkpoint)
    }
}

/// Same layout as [`Checkpoint`], borrowing the network so a trainer can save
/// without cloning its weights.
#[derive(Serialize)]
struct CheckpointRef<'a> {
    network: &'a Network,
    acc: f64,
    epoch: usize,
}

/// Writes `network` as a checkpoint to `dir/file` and returns the path.
pub(crate) fn save_checkpoint(
    network: &Network,
    acc: f64,
    epoch: usize,
    dir: &Path,
    file: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file);
    let checkpoint = CheckpointRef {
        network,
        acc,
        epoch,
    };
    fs::write(&path, serde_json::to_string(&checkpoint)?)?;
    info!("Saved checkpoint (acc {acc:.2}%, epoch {epoch}) to {}", path.display());
    Ok(path)
}
