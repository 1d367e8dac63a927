use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tessera_chunk::{Chunk, encode_chunk};
use tessera_world::ChunkCoord;

use crate::error::StoreError;

/// Raw chunk storage. Implementations return encoded chunk payloads and must be
/// safe to call from many render workers at once.
pub trait ChunkStore: Send + Sync {
    fn read_chunk(&self, coord: ChunkCoord) -> Result<Vec<u8>, StoreError>;

    /// Every chunk present in storage, sorted.
    fn list_chunks(&self) -> Result<Vec<ChunkCoord>, StoreError>;

    /// Last modification time of a chunk in seconds since the epoch, when the
    /// store tracks it.
    fn modified_at(&self, _coord: ChunkCoord) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<ChunkCoord, Vec<u8>>>,
    failing: RwLock<HashSet<ChunkCoord>>,
    reads: AtomicU64,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, chunk: &Chunk) {
        self.put_raw(chunk.coord, encode_chunk(chunk));
    }

    /// Stores arbitrary bytes for `coord`, e.g. to simulate corruption.
    pub fn put_raw(&self, coord: ChunkCoord, bytes: Vec<u8>) {
        self.chunks.write().unwrap().insert(coord, bytes);
    }

    pub fn remove(&self, coord: ChunkCoord) -> bool {
        self.chunks.write().unwrap().remove(&coord).is_some()
    }

    /// Makes reads of `coord` fail with an I/O error until [`Self::heal`].
    pub fn fail_reads(&self, coord: ChunkCoord) {
        self.failing.write().unwrap().insert(coord);
    }

    pub fn heal(&self, coord: ChunkCoord) {
        self.failing.write().unwrap().remove(&coord);
    }

    /// Number of `read_chunk` calls served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ChunkStore for MemoryChunkStore {
    fn read_chunk(&self, coord: ChunkCoord) -> Result<Vec<u8>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().unwrap().contains(&coord) {
            return Err(StoreError::Io(io::Error::other("injected read failure")));
        }
        self.chunks
            .read()
            .unwrap()
            .get(&coord)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn list_chunks(&self) -> Result<Vec<ChunkCoord>, StoreError> {
        let mut out: Vec<ChunkCoord> = self.chunks.read().unwrap().keys().copied().collect();
        out.sort();
        Ok(out)
    }
}
