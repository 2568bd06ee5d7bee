/// Error types for the extraction engine
use std::path::PathBuf;
use thiserror::Error;

use crate::CellId;

/// Failures that abort an extraction call.
///
/// Per-row defects never show up here; they are handled where the row is
/// parsed (see [`crate::parse::RowDefect`]).
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A coordinate catalog line could not be read as `id x y`
    #[error("Malformed coordinate catalog {path:?} at line {line}: {reason}")]
    MalformedCatalog {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A hydrograph or flood-plane log is structurally broken
    #[error("Malformed log {path:?} at line {line}: {reason}")]
    MalformedLog {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A label map references a cell that has no extracted result
    #[error("Unknown cell id: {0}")]
    UnknownCellId(CellId),

    /// Underlying file could not be opened, read or written
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller raised the abort signal between blocks
    #[error("Extraction aborted after {completed} blocks")]
    Aborted { completed: usize },

    /// Run configuration could not be loaded
    #[error("Invalid run configuration: {0}")]
    Config(String),
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed_log(
        path: impl Into<PathBuf>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        ExtractError::MalformedLog {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Type alias for Results using ExtractError
pub type Result<T> = std::result::Result<T, ExtractError>;
