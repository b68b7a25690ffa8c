//! Error taxonomy shared by the library crates.

use std::path::PathBuf;
use thiserror::Error;

use crate::Real;

/// Fatal pipeline errors.
///
/// Every variant terminates the pipeline; none is retried automatically.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Missing images, unreadable files, or collections whose lengths disagree.
    #[error("input error: {0}")]
    Input(String),

    /// The pair graph has no spanning tree over all images.
    #[error("pair graph is disconnected: images {unreachable:?} are unreachable from image {root}")]
    DisconnectedGraph { root: usize, unreachable: Vec<usize> },

    /// The alignment loss became non-finite.
    #[error("optimization diverged at iteration {iteration} (loss = {loss})")]
    OptimizationDiverged { iteration: usize, loss: Real },

    /// The output artifact could not be written.
    #[error("failed to write {path}: {message}", path = .path.display())]
    Serialization { path: PathBuf, message: String },

    /// Export was requested before the optimization converged.
    #[error("scene is provisional ({phase}); run the optimization to completion before export")]
    ProvisionalScene { phase: String },
}

impl FusionError {
    /// Shorthand for [`FusionError::Input`].
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }
}

/// Result alias used by the library crates.
pub type Result<T, E = FusionError> = std::result::Result<T, E>;

/// Precondition check for aligned collections (images, points, masks, poses, focals).
pub fn ensure_same_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(FusionError::input(format!(
            "{what}: expected {expected} entries, got {actual}"
        )));
    }
    Ok(())
}
