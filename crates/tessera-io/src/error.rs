use std::io;

use thiserror::Error;

/// Failure of the raw storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk not present")]
    NotFound,
    #[error("corrupt chunk record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to produce a decoded chunk.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The chunk does not exist; treated as a world edge.
    #[error("chunk not found")]
    NotFound,
    #[error("corrupt chunk data: {0}")]
    CorruptData(String),
    /// Storage was unreachable; the chunk may exist.
    #[error("chunk read failed: {0}")]
    Io(#[source] io::Error),
}

impl From<StoreError> for ReadError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ReadError::NotFound,
            StoreError::Corrupt(reason) => ReadError::CorruptData(reason),
            StoreError::Io(err) => ReadError::Io(err),
        }
    }
}
