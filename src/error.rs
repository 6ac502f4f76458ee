//! Error kinds for the generation pipeline.
//!
//! All of these are fatal: they unwind to the pipeline entry point, which
//! reports failure. Skipped records and data oddities (duplicate geometries,
//! overwritten pairings) are logged, not raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Reading, writing, mapping, or renaming a pipeline file failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A framed record in the feature stream could not be decoded.
    #[error("malformed feature stream: {0}")]
    Codec(String),

    /// The locality index could not be built or opened.
    #[error("locality index failure: {0}")]
    IndexBuild(String),

    /// A JSON descriptor lacks an obligatory field; points at an upstream
    /// generator bug.
    #[error("malformed json descriptor: {0}")]
    Schema(String),
}
