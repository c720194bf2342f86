//! Error kinds crossing the pipeline's collaborator boundaries.
//!
//! The set is closed: decode, empty crop, detector, upload. Anything else in
//! the crate (config, server setup, storage internals) is an `anyhow::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input bytes do not decode to an image. The pipeline never starts.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A box collapsed to zero area after clipping. Recovered inside the
    /// pipeline by skipping the detection; never reaches a caller.
    #[error("detection box has zero area after clipping")]
    EmptyCrop,

    /// The object detector failed. No partial results are returned.
    #[error("detector failure: {0}")]
    Detector(String),

    /// Best-effort persistence failed after detection completed.
    #[error("upload failed: {0}")]
    Upload(String),
}

impl PipelineError {
    /// HTTP status reported for this error kind at the request boundary.
    pub fn status(&self) -> u16 {
        match self {
            PipelineError::Decode(_) => 400,
            PipelineError::EmptyCrop | PipelineError::Detector(_) | PipelineError::Upload(_) => {
                500
            }
        }
    }

    pub(crate) fn detector(err: impl std::fmt::Display) -> Self {
        PipelineError::Detector(err.to_string())
    }

    pub(crate) fn upload(err: impl std::fmt::Display) -> Self {
        PipelineError::Upload(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
