//! Error types for each pipeline stage.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading a descriptor file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("descriptor file is empty, expected a `<count> <feature size>` header")]
    MissingHeader,

    #[error("invalid descriptor header {0:?}, expected `<count> <feature size>`")]
    InvalidHeader(String),

    /// A record's first line must hold exactly x, y, scale and angle.
    #[error("wrong value count ({found}) for first line of feature on line {line}, expected 4")]
    MalformedRecord { line: usize, found: usize },

    #[error("feature starting on line {line} ended after {found} of {expected} values")]
    TruncatedRecord {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("feature starting on line {line} has {found} values, expected {expected}")]
    OverlongRecord {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exited with {status}", program.display())]
    Exit { program: PathBuf, status: String },

    #[error("{} timed out after {limit:?} and was killed", program.display())]
    Timeout { program: PathBuf, limit: Duration },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A derived artifact could not be produced for one image.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{image}: cannot open input: {source}")]
    OpenInput {
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{image}: cannot write {artifact}: {source}")]
    WriteArtifact {
        image: String,
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{image}: producing {artifact} failed: {source}")]
    Tool {
        image: String,
        artifact: String,
        #[source]
        source: ToolError,
    },
}

/// Errors that invalidate one descriptor file (or the whole combined table).
#[derive(Error, Debug)]
pub enum CombineError {
    #[error("{file}: unexpected feature size {actual}, expected {expected}")]
    FeatureSizeMismatch {
        file: String,
        expected: usize,
        actual: usize,
    },

    #[error("{file}: unexpected feature count {actual}, header declares {declared}")]
    RecordCountMismatch {
        file: String,
        declared: usize,
        actual: usize,
    },

    #[error("{file}: no trailing `_<number>.<ext>` to use as row identifier")]
    UnrecognizedFileName { file: String },

    #[error("{file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },

    #[error("writing combined table: {0}")]
    Write(#[source] std::io::Error),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CombineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CombineError::Io {
            path: path.into(),
            source,
        }
    }
}
