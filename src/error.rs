use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The primary error type for all operations in the `blockzip` crate.
#[derive(Debug, Error)]
pub enum BlockzipError {
    /// Invalid command, missing paths, or a setting outside its allowed range.
    /// Raised before any pipeline role starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The archive directory is inconsistent with the file it was read from.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The payload codec rejected a block (e.g. a truncated compressed stream).
    #[error("codec error on block {block_id}: {source}")]
    Codec {
        block_id: u32,
        #[source]
        source: std::io::Error,
    },

    /// The configured block size does not fit in the usable memory budget.
    #[error("block size {block_size} bytes exceeds the usable memory budget of {available} bytes")]
    Budget { block_size: u64, available: u64 },

    /// The sink finished a different number of blocks than were planned.
    #[error("directory mismatch: {planned} blocks planned but {completed} completed")]
    BlockCountMismatch { planned: usize, completed: usize },

    /// The run did not finish within the configured timeout.
    #[error("run exceeded the timeout of {0:?}")]
    Timeout(Duration),

    /// A role stopped because another role failed first.
    #[error("run cancelled")]
    Cancelled,

    /// A pipeline thread panicked instead of returning a result.
    #[error("{role} thread panicked")]
    RolePanicked { role: String },
}

impl BlockzipError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BlockzipError::Io {
            source,
            path: path.into(),
        }
    }

    /// True for the echo a role returns after observing cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BlockzipError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, BlockzipError>;
