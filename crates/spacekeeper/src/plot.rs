use crate::space_id::SpaceId;
use poc_primitives::{Challenge, Proof, UnusableBitLength};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by a plot backend.
///
/// Cloneable on purpose: proof lookup failures are memoized in the proof
/// cache next to successful lookups.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PlotError {
    /// Proof lookup against a plot that has not finished plotting
    #[error("plot is not ready for proof lookup")]
    NotReady,
    /// Requested bit length is outside of the usable set
    #[error("bit length {0} is not usable")]
    UnusableBitLength(u8),
    /// On-disk data failed validation
    #[error("plot data is corrupted: {0}")]
    Corrupted(String),
    /// Underlying I/O failure
    #[error("plot I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for PlotError {
    fn from(error: io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<UnusableBitLength> for PlotError {
    fn from(error: UnusableBitLength) -> Self {
        Self::UnusableBitLength(error.0)
    }
}

/// How a [`PlotBackend::plot`] run ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlotOutcome {
    /// Plotting ran to completion, proofs can be looked up now
    Plotted,
    /// Plotting was interrupted by [`PlotBackend::stop_plot`]
    Interrupted,
}

/// Per-work-space handle to the on-disk plot format.
///
/// The backend owns plot execution, plot progress and the plot data itself;
/// the keeper only decides which plot runs next and when it changes state.
pub trait PlotBackend: Send + Sync + fmt::Debug {
    /// Computes the plot. Blocking and long-running; returns
    /// [`PlotOutcome::Interrupted`] when [`Self::stop_plot`] trips mid-run,
    /// in which case progress so far is preserved and a later call resumes.
    fn plot(&self) -> Result<PlotOutcome, PlotError>;

    /// Cooperatively cancels an in-flight or imminent [`Self::plot`] run.
    /// Idempotent.
    fn stop_plot(&self);

    /// Looks up the proof for `challenge`. Blocking and thread-safe.
    fn get_proof(&self, challenge: &Challenge) -> Result<Proof, PlotError>;

    /// Plotting progress in `[0, 1]`.
    fn progress(&self) -> f64;

    /// Destroys the on-disk plot data.
    fn delete(&self) -> Result<(), PlotError>;
}

/// A plot discovered on disk by [`PlotBackendFactory::scan`].
#[derive(Debug)]
pub struct ScannedPlot {
    /// Identity recovered from the plot metadata
    pub id: SpaceId,
    /// Opened backend for the discovered plot
    pub backend: Arc<dyn PlotBackend>,
}

/// Factory over the on-disk plot format, the seam to the `db` layer.
pub trait PlotBackendFactory: Send + Sync {
    /// Opens the backend for one plot, creating it on disk under `directory`
    /// when it does not exist yet.
    fn open(&self, directory: &Path, id: SpaceId) -> Result<Arc<dyn PlotBackend>, PlotError>;

    /// Scans `directories` for existing plots.
    fn scan(&self, directories: &[PathBuf]) -> Result<Vec<ScannedPlot>, PlotError>;
}
