//! Tile assembly and the two-tier tile cache.
#![forbid(unsafe_code)]

mod assembler;
mod cache;
pub mod disk;
mod error;
mod tile;

pub use assembler::{RegionSource, TileAssembler};
pub use cache::{
    PutOutcome, ServedTile, TileCache, TileCacheConfig, TileCacheStats, TileLookup, TileState,
};
pub use error::TileCacheError;
pub use tile::{Coverage, Tile};
