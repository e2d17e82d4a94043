use thiserror::Error;

use crate::engine::PushError;
use crate::gui::GuiUnavailable;

/// Failures surfaced by the video output lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// Malformed description or an endpoint that could not be resolved
    #[error("pipeline construction failed: {0}")]
    GraphBuildFailure(String),

    /// The engine refused the Playing transition
    #[error("pipeline refused to start: {0}")]
    StateTransitionFailure(String),

    /// Downstream closed or the buffer was refused
    #[error("frame rejected by pipeline: {0}")]
    PushRejected(#[from] PushError),

    /// Error reported on the pipeline bus
    #[error("pipeline engine error: {0}")]
    AsyncEngineError(String),

    /// The GUI-owning context is gone, so the lifecycle call could not run
    #[error("GUI context is not running")]
    GuiUnavailable,
}

impl From<GuiUnavailable> for OutputError {
    fn from(_: GuiUnavailable) -> Self {
        Self::GuiUnavailable
    }
}
