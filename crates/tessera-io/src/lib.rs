//! World reader: chunk stores, region files and the versioned chunk cache.
#![forbid(unsafe_code)]

mod error;
mod reader;
pub mod region_file;
mod store;

pub use error::{ReadError, StoreError};
pub use reader::{ChunkPin, ChunkReader, PinnedLoad, ReaderStats, RegionLoad, StampedLoad};
pub use region_file::{
    Compression, RegionFileCoord, RegionFileStore, RegionFileWriter, RegionHeader,
    region_coord_from_path,
};
pub use store::{ChunkStore, MemoryChunkStore};
