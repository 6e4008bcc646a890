use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions of the analysis pipeline.
/// Returned to the caller instead of terminating the process, so the CLI
/// shell and the tests can decide how to present them.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input file exists but contains no bytes at all
    #[error("input file {0:?} is empty")]
    EmptyInput(PathBuf),

    /// Parsing finished but not a single usable vacancy row survived
    #[error("no usable vacancy rows in the input")]
    NoUsableData,

    /// The remote rate source kept failing after the bounded retries
    #[error("rate source unavailable: {0}")]
    RateSourceUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
