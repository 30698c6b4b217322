//! Error taxonomy for the data quality pipeline.
//!
//! Failures are split by where they are allowed to surface: input-path
//! errors abort before any work starts, detection and source-synthesis
//! errors degrade into placeholder results, and only executive-level
//! synthesis failures abort a running pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the external reasoning service boundary.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to reasoning service at {0}")]
    Connect(String),

    #[error("reasoning service error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response from reasoning service: {0}")]
    MalformedResponse(String),
}

impl ExternalServiceError {
    /// Map a reqwest transport error onto the taxonomy.
    pub fn from_reqwest(err: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ExternalServiceError::Timeout(timeout_secs)
        } else if err.is_connect() {
            ExternalServiceError::Connect(base_url.to_string())
        } else {
            ExternalServiceError::MalformedResponse(err.to_string())
        }
    }
}

/// A detector/source pair failed. Isolated: degrades to an undetermined
/// finding and never aborts other detectors or sources.
#[derive(Debug, Error)]
#[error("detection failed for source {source_id} ({detector}): {reason}")]
pub struct DetectionError {
    pub source_id: String,
    pub detector: String,
    pub reason: String,
}

/// Source- or executive-level synthesis failed.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("source synthesis failed for {source_id}: {reason}")]
    Source { source_id: String, reason: String },

    #[error("executive synthesis failed: {reason}")]
    Executive { reason: String },

    #[error("executive synthesis called with no source reports")]
    EmptyInput,
}

/// Top-level pipeline errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input folder not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("no source metadata files (*_native.md) found in {}", .0.display())]
    NoSources(PathBuf),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("failed to read input data: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse file listing: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
