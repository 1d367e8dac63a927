use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use log::{debug, warn};
use lru::LruCache;
use tessera_chunk::{Chunk, decode_chunk};
use tessera_world::{ChunkCoord, RegionCoord, VersionClock, WorldLayout};

use crate::error::ReadError;
use crate::store::ChunkStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
    pub pinned: usize,
}

struct CachedChunk {
    chunk: Arc<Chunk>,
    pins: Arc<AtomicUsize>,
    bytes: usize,
}

/// A chunk held in the cache until the guard is dropped.
pub struct ChunkPin {
    chunk: Arc<Chunk>,
    pins: Arc<AtomicUsize>,
}

impl ChunkPin {
    pub fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }
}

impl Deref for ChunkPin {
    type Target = Chunk;

    fn deref(&self) -> &Chunk {
        &self.chunk
    }
}

impl std::fmt::Debug for ChunkPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPin")
            .field("coord", &self.chunk.coord)
            .field("version", &self.chunk.version)
            .finish()
    }
}

impl Drop for ChunkPin {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Outcome of one chunk load together with the version stamp the load observed.
/// For chunks that failed to load, the stamp still identifies the storage state
/// that was seen.
pub struct StampedLoad {
    pub stamp: u64,
    pub result: Result<Arc<Chunk>, ReadError>,
}

/// [`StampedLoad`] for renders: a loaded chunk stays resident while the pin lives.
pub struct PinnedLoad {
    pub stamp: u64,
    pub result: Result<ChunkPin, ReadError>,
}

/// Every chunk of a render region, loaded without aborting on bad chunks.
#[derive(Default)]
pub struct RegionLoad {
    pub region: RegionCoord,
    pub chunks: Vec<Arc<Chunk>>,
    pub missing: Vec<ChunkCoord>,
    pub corrupt: Vec<ChunkCoord>,
    pub failed: Vec<ChunkCoord>,
    /// Highest version stamp observed across the region's chunks.
    pub version: u64,
}

impl RegionLoad {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Chunk cache in front of a [`ChunkStore`]: decodes on miss, keeps decoded
/// chunks under a byte budget and assigns version stamps.
pub struct ChunkReader {
    store: Arc<dyn ChunkStore>,
    layout: WorldLayout,
    clock: Arc<VersionClock>,
    entries: DashMap<ChunkCoord, CachedChunk>,
    stamps: DashMap<ChunkCoord, u64>,
    load_locks: DashMap<ChunkCoord, Arc<Mutex<()>>>,
    order: Mutex<LruCache<ChunkCoord, ()>>,
    budget_bytes: usize,
    bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkReader {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        layout: WorldLayout,
        clock: Arc<VersionClock>,
        budget_bytes: usize,
    ) -> Self {
        Self {
            store,
            layout,
            clock,
            entries: DashMap::new(),
            stamps: DashMap::new(),
            load_locks: DashMap::new(),
            order: Mutex::new(LruCache::unbounded()),
            budget_bytes,
            bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<VersionClock> {
        &self.clock
    }

    pub fn load_chunk(&self, coord: ChunkCoord) -> Result<Arc<Chunk>, ReadError> {
        self.load_stamped(coord).result
    }

    pub fn load_stamped(&self, coord: ChunkCoord) -> StampedLoad {
        match self.fetch(coord, false) {
            Ok((chunk, _)) => StampedLoad {
                stamp: chunk.version,
                result: Ok(chunk),
            },
            Err((stamp, e)) => StampedLoad {
                stamp,
                result: Err(e),
            },
        }
    }

    /// Loads the chunk and keeps it resident until the pin is dropped.
    pub fn pin(&self, coord: ChunkCoord) -> Result<ChunkPin, ReadError> {
        self.load_pinned(coord).result
    }

    pub fn load_pinned(&self, coord: ChunkCoord) -> PinnedLoad {
        match self.fetch(coord, true) {
            Ok((chunk, pins)) => PinnedLoad {
                stamp: chunk.version,
                result: Ok(ChunkPin { chunk, pins }),
            },
            Err((stamp, e)) => PinnedLoad {
                stamp,
                result: Err(e),
            },
        }
    }

    pub fn load_region(&self, region: RegionCoord) -> RegionLoad {
        let mut out = RegionLoad {
            region,
            ..RegionLoad::default()
        };
        for coord in self.layout.chunks_in_region(region) {
            let load = self.load_stamped(coord);
            out.version = out.version.max(load.stamp);
            match load.result {
                Ok(chunk) => out.chunks.push(chunk),
                Err(ReadError::NotFound) => out.missing.push(coord),
                Err(ReadError::CorruptData(reason)) => {
                    warn!("chunk {coord:?} in region {region} is corrupt: {reason}");
                    out.corrupt.push(coord);
                }
                Err(ReadError::Io(e)) => {
                    warn!("chunk {coord:?} in region {region} could not be read: {e}");
                    out.failed.push(coord);
                }
            }
        }
        out
    }

    /// Current stamp of `coord`, if it was ever loaded or invalidated.
    pub fn current_version(&self, coord: ChunkCoord) -> Option<u64> {
        self.stamps.get(&coord).map(|v| *v)
    }

    /// Highest known stamp among `coords`; 0 when none is known.
    pub fn max_version(&self, coords: &[ChunkCoord]) -> u64 {
        coords
            .iter()
            .filter_map(|c| self.current_version(*c))
            .max()
            .unwrap_or(0)
    }

    /// Highest known stamp of everything a level-0 render of `region` reads.
    pub fn region_source_version(&self, region: RegionCoord) -> u64 {
        self.max_version(&self.layout.source_chunks(region))
    }

    /// Drops the cached copy of `coord` (even when pinned; pins keep their
    /// old data) and assigns a fresh stamp. Returns the new stamp.
    pub fn invalidate(&self, coord: ChunkCoord) -> u64 {
        let lock = self.load_lock(coord);
        let stamp = {
            let _guard = lock.lock().unwrap();
            let stamp = self.clock.next();
            self.stamps.insert(coord, stamp);
            if let Some((_, old)) = self.entries.remove(&coord) {
                self.bytes.fetch_sub(old.bytes, Ordering::AcqRel);
            }
            self.order.lock().unwrap().pop(&coord);
            stamp
        };
        drop(lock);
        self.release_load_lock(coord);
        stamp
    }

    /// Invalidates every chunk of a render region; returns the highest new stamp.
    pub fn invalidate_region(&self, region: RegionCoord) -> u64 {
        self.layout
            .chunks_in_region(region)
            .into_iter()
            .map(|c| self.invalidate(c))
            .max()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            bytes: self.bytes.load(Ordering::Relaxed),
            pinned: self
                .entries
                .iter()
                .filter(|e| e.pins.load(Ordering::Acquire) > 0)
                .count(),
        }
    }

    fn lookup(&self, coord: &ChunkCoord, pin: bool) -> Option<(Arc<Chunk>, Arc<AtomicUsize>)> {
        let entry = self.entries.get(coord)?;
        if pin {
            entry.pins.fetch_add(1, Ordering::AcqRel);
        }
        Some((entry.chunk.clone(), entry.pins.clone()))
    }

    /// Returns the chunk and its pin counter; with `pin` the counter is
    /// raised before the entry can be considered for eviction.
    fn fetch(
        &self,
        coord: ChunkCoord,
        pin: bool,
    ) -> Result<(Arc<Chunk>, Arc<AtomicUsize>), (u64, ReadError)> {
        if let Some((chunk, pins)) = self.lookup(&coord, pin) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.touch(coord);
            return Ok((chunk, pins));
        }

        let lock = self.load_lock(coord);
        let result = {
            let _guard = lock.lock().unwrap();
            if let Some((chunk, pins)) = self.lookup(&coord, pin) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok((chunk, pins))
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let stamp = *self
                    .stamps
                    .entry(coord)
                    .or_insert_with(|| self.clock.next());
                match self.read_and_decode(coord) {
                    Ok(chunk) => {
                        let chunk = Arc::new(chunk.with_version(stamp));
                        let pins = Arc::new(AtomicUsize::new(usize::from(pin)));
                        let bytes = chunk.approx_bytes();
                        self.entries.insert(
                            coord,
                            CachedChunk {
                                chunk: chunk.clone(),
                                pins: pins.clone(),
                                bytes,
                            },
                        );
                        self.bytes.fetch_add(bytes, Ordering::AcqRel);
                        self.order.lock().unwrap().put(coord, ());
                        Ok((chunk, pins))
                    }
                    Err(e) => Err((stamp, e)),
                }
            }
        };
        drop(lock);
        self.release_load_lock(coord);
        if result.is_ok() {
            self.enforce_budget();
        }
        result
    }

    fn read_and_decode(&self, coord: ChunkCoord) -> Result<Chunk, ReadError> {
        let bytes = match self.store.read_chunk(coord) {
            Ok(b) => b,
            Err(e) => {
                let e = ReadError::from(e);
                if matches!(e, ReadError::NotFound) {
                    debug!("chunk {coord:?} not present");
                }
                return Err(e);
            }
        };
        let chunk = decode_chunk(&bytes).map_err(|e| ReadError::CorruptData(e.to_string()))?;
        if chunk.coord != coord {
            return Err(ReadError::CorruptData(format!(
                "payload is for chunk {:?}",
                chunk.coord
            )));
        }
        if chunk.size != self.layout.chunk_size {
            return Err(ReadError::CorruptData(format!(
                "chunk size {} does not match world chunk size {}",
                chunk.size, self.layout.chunk_size
            )));
        }
        Ok(chunk)
    }

    fn load_lock(&self, coord: ChunkCoord) -> Arc<Mutex<()>> {
        self.load_locks
            .entry(coord)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_load_lock(&self, coord: ChunkCoord) {
        self.load_locks
            .remove_if(&coord, |_, l| Arc::strong_count(l) == 1);
    }

    fn touch(&self, coord: ChunkCoord) {
        let mut order = self.order.lock().unwrap();
        order.get(&coord);
    }

    fn enforce_budget(&self) {
        if self.bytes.load(Ordering::Acquire) <= self.budget_bytes {
            return;
        }
        let mut order = self.order.lock().unwrap();
        let mut over = self
            .bytes
            .load(Ordering::Acquire)
            .saturating_sub(self.budget_bytes);
        let candidates: Vec<ChunkCoord> = order.iter().rev().map(|(c, _)| *c).collect();
        for coord in candidates {
            if over == 0 {
                break;
            }
            let removed = self
                .entries
                .remove_if(&coord, |_, e| e.pins.load(Ordering::Acquire) == 0);
            if let Some((_, old)) = removed {
                order.pop(&coord);
                self.bytes.fetch_sub(old.bytes, Ordering::AcqRel);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                over = over.saturating_sub(old.bytes);
            }
        }
    }
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("layout", &self.layout)
            .field("budget_bytes", &self.budget_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}
