use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileCacheError {
    #[error("tile cache I/O: {0}")]
    Io(#[from] io::Error),
    #[error("could not publish tile file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("tile body encoding failed: {0}")]
    Encode(#[from] postcard::Error),
    #[error("corrupt tile file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}
