use std::io;
use std::path::PathBuf;

use tessera_blocks::RegistryError;
use tessera_io::StoreError;
use tessera_tiles::TileCacheError;
use tessera_world::TileKey;
use thiserror::Error;

/// Failure of a single render job.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The tile was rendered but could not be stored; retried with backoff.
    #[error("writing {key} to the tile cache failed: {source}")]
    CacheWrite {
        key: TileKey,
        #[source]
        source: TileCacheError,
    },
    #[error("render of {key} panicked: {message}")]
    Panicked { key: TileKey, message: String },
}

impl RenderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenderError::CacheWrite { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Startup failures; the only errors that stop the service.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("block registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("chunk store: {0}")]
    Store(#[from] StoreError),
    #[error("tile cache: {0}")]
    Cache(#[from] TileCacheError),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}
