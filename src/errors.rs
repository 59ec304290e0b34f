use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Identifier;

/// Error type for indexing, path mapping, rewrite, and configuration failures.
#[derive(Debug, Error)]
pub enum DeidError {
    #[error("image object '{}' could not be decoded: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("image object '{}' could not be encoded: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
    #[error("annotation document '{}' could not be parsed: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("annotation document '{}' could not be written: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error(
        "source path '{}' has {depth} components, at least {required} are needed to re-root it",
        path.display()
    )]
    PathDepth {
        path: PathBuf,
        depth: usize,
        required: usize,
    },
    #[error("source path '{}' has no '{anchor}' component to re-root at", path.display())]
    AnchorNotFound { path: PathBuf, anchor: String },
    #[error("source path '{}' cannot be re-rooted: {reason}", path.display())]
    UnsupportedPath { path: PathBuf, reason: String },
    #[error(
        "destination '{}' is already claimed by '{}' (requested by '{}')",
        destination.display(),
        existing.display(),
        requested.display()
    )]
    PathCollision {
        destination: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },
    #[error(
        "annotation document '{}' changed since indexing: occurrence {ordinal} {details}",
        path.display()
    )]
    OccurrenceMismatch {
        path: PathBuf,
        ordinal: usize,
        details: String,
    },
    #[error("identifier '{identifier}' has no entry in the mutation map")]
    UnmappedIdentifier { identifier: Identifier },
    #[error("refusing to overwrite source file '{}'", path.display())]
    SourceOverwrite { path: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DeidError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
