use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use log::{debug, info, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tessera_world::{LodPolicy, RegionCoord, TileKey};

use crate::disk::DiskTier;
use crate::error::TileCacheError;
use crate::tile::Tile;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    /// Directory of the disk tier; memory-only when unset.
    pub root: Option<PathBuf>,
    /// Decoded tiles kept in memory.
    pub memory_tiles: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            memory_tiles: 512,
        }
    }
}

#[derive(Clone, Debug)]
pub enum TileLookup {
    Hit(Arc<Tile>),
    /// The stored tile is older than its sources, was invalidated, or is an
    /// incomplete placeholder.
    Stale(Arc<Tile>),
    Miss,
}

impl TileLookup {
    pub fn tile(&self) -> Option<&Arc<Tile>> {
        match self {
            TileLookup::Hit(t) | TileLookup::Stale(t) => Some(t),
            TileLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, TileLookup::Hit(_))
    }

    /// The stored tile, if any, tagged with whether it is behind its sources.
    pub fn served(self) -> Option<ServedTile> {
        match self {
            TileLookup::Hit(tile) => Some(ServedTile { tile, stale: false }),
            TileLookup::Stale(tile) => Some(ServedTile { tile, stale: true }),
            TileLookup::Miss => None,
        }
    }
}

/// A tile handed to a reader. `stale` tiles are outdated geometry and are
/// already being refreshed.
#[derive(Clone, Debug)]
pub struct ServedTile {
    pub tile: Arc<Tile>,
    pub stale: bool,
}

impl ServedTile {
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn into_tile(self) -> Arc<Tile> {
        self.tile
    }
}

impl Deref for ServedTile {
    type Target = Tile;

    fn deref(&self) -> &Tile {
        &self.tile
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A tile with a higher version is already stored; the write was dropped.
    Superseded { stored: u64 },
}

/// Bookkeeping for one key, independent of whether the tile is resident.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileState {
    /// Version of the stored tile, if any.
    pub stored: Option<u64>,
    /// Minimum version a fresh tile must have.
    pub required: u64,
    pub invalidated: bool,
    pub incomplete: bool,
    /// Bumped by every invalidation.
    pub epoch: u64,
}

impl TileState {
    pub fn is_stale(&self) -> bool {
        match self.stored {
            None => true,
            Some(v) => self.invalidated || self.incomplete || v < self.required,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileCacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub superseded: u64,
    pub memory_entries: usize,
    pub known_tiles: usize,
}

/// Two-tier tile store: an LRU of decoded tiles over an optional directory
/// of atomically published tile files.
pub struct TileCache {
    lod: LodPolicy,
    memory: Mutex<LruCache<TileKey, Arc<Tile>>>,
    state: DashMap<TileKey, TileState>,
    write_locks: DashMap<TileKey, Arc<Mutex<()>>>,
    disk: Option<DiskTier>,
    high_water: AtomicU64,
    high_water_lock: Mutex<()>,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    superseded: AtomicU64,
}

impl TileCache {
    pub fn in_memory(memory_tiles: usize, lod: LodPolicy) -> Self {
        Self::with_disk(None, memory_tiles, lod)
    }

    fn with_disk(disk: Option<DiskTier>, memory_tiles: usize, lod: LodPolicy) -> Self {
        let cap = NonZeroUsize::new(memory_tiles).unwrap_or(NonZeroUsize::MIN);
        Self {
            lod,
            memory: Mutex::new(LruCache::new(cap)),
            state: DashMap::new(),
            write_locks: DashMap::new(),
            disk,
            high_water: AtomicU64::new(0),
            high_water_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    /// Opens the cache, rebuilding per-key state from the disk tier. Stray
    /// temp files from interrupted writes are removed.
    pub fn open(config: &TileCacheConfig, lod: LodPolicy) -> Result<Self, TileCacheError> {
        let Some(root) = &config.root else {
            return Ok(Self::in_memory(config.memory_tiles, lod));
        };
        let disk = DiskTier::new(root);
        std::fs::create_dir_all(disk.root())?;
        let entries = disk.scan()?;
        let mut high = disk.read_high_water_mark()?;
        let cache = Self::with_disk(Some(disk), config.memory_tiles, lod);
        for e in &entries {
            high = high.max(e.header.version);
            cache.state.insert(
                e.header.key,
                TileState {
                    stored: Some(e.header.version),
                    required: 0,
                    invalidated: e.marked_stale,
                    incomplete: e.header.incomplete,
                    epoch: 0,
                },
            );
        }
        cache.high_water.store(high, Ordering::Relaxed);
        info!(
            "tile cache at {}: {} tiles on disk, version mark {}",
            root.display(),
            entries.len(),
            high
        );
        Ok(cache)
    }

    pub fn lod(&self) -> &LodPolicy {
        &self.lod
    }

    pub fn is_persistent(&self) -> bool {
        self.disk.is_some()
    }

    /// Highest tile version ever stored. Version clocks start above it.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn state(&self, key: TileKey) -> Option<TileState> {
        self.state.get(&key).map(|s| *s)
    }

    /// Keys with a stored tile at `level`, in key order.
    pub fn keys_at(&self, level: u8) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self
            .state
            .iter()
            .filter(|e| e.key().level == level && e.value().stored.is_some())
            .map(|e| *e.key())
            .collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: TileKey) -> TileLookup {
        let resident = self.memory.lock().unwrap().get(&key).cloned();
        let tile = match resident {
            Some(t) => Some(t),
            None => self.load_from_disk(key),
        };
        let Some(tile) = tile else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return TileLookup::Miss;
        };
        let stale = tile.incomplete
            || self.state(key).is_none_or(|s| {
                s.is_stale() || tile.version < s.required || s.stored.is_some_and(|v| tile.version < v)
            });
        if stale {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
            TileLookup::Stale(tile)
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            TileLookup::Hit(tile)
        }
    }

    /// Serving path: whatever is stored, marked stale when it is. Never renders.
    pub fn get_tile(&self, region: RegionCoord, level: u8) -> Option<ServedTile> {
        self.get(TileKey::new(region, level)).served()
    }

    fn load_from_disk(&self, key: TileKey) -> Option<Arc<Tile>> {
        let disk = self.disk.as_ref()?;
        match disk.read(key) {
            Ok(Some(tile)) => {
                let tile = Arc::new(tile);
                self.memory.lock().unwrap().put(key, tile.clone());
                Some(tile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("tile {key} unreadable: {e}");
                None
            }
        }
    }

    fn write_lock(&self, key: TileKey) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Stores `tile` unless a newer version is already stored. Disk publish
    /// happens before the tile becomes visible in memory.
    pub fn put(&self, tile: Tile) -> Result<PutOutcome, TileCacheError> {
        let key = tile.key;
        let lock = self.write_lock(key);
        let _guard = lock.lock().unwrap();

        let start = self.state(key).unwrap_or_default();
        if let Some(stored) = start.stored.filter(|&v| v > tile.version) {
            self.superseded.fetch_add(1, Ordering::Relaxed);
            debug!("dropping {key} v{} (v{stored} already stored)", tile.version);
            return Ok(PutOutcome::Superseded { stored });
        }

        if let Some(disk) = &self.disk {
            disk.write(&tile)?;
        }
        self.raise_high_water(tile.version)?;

        {
            // Invalidations that landed while the file was written still count.
            let mut entry = self.state.entry(key).or_default();
            let fresh = !tile.incomplete
                && tile.version >= entry.required
                && entry.epoch == start.epoch;
            entry.stored = Some(tile.version);
            entry.incomplete = tile.incomplete;
            if fresh {
                entry.invalidated = false;
                if let Some(disk) = &self.disk {
                    disk.clear_stale(key)?;
                }
            }
        }
        self.memory.lock().unwrap().put(key, Arc::new(tile));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(PutOutcome::Stored)
    }

    fn raise_high_water(&self, version: u64) -> Result<(), TileCacheError> {
        let _guard = self.high_water_lock.lock().unwrap();
        if version <= self.high_water.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(disk) = &self.disk {
            disk.write_high_water_mark(version)?;
        }
        self.high_water.store(version, Ordering::Relaxed);
        Ok(())
    }

    /// Marks the level-0 tile of `region` and every ancestor stale. Returns
    /// the affected keys, finest first.
    pub fn invalidate(&self, region: RegionCoord) -> Vec<TileKey> {
        self.invalidate_to(region, 0)
    }

    /// Like [`invalidate`](Self::invalidate), also raising the version a
    /// replacement must reach.
    pub fn invalidate_to(&self, region: RegionCoord, version: u64) -> Vec<TileKey> {
        let base = TileKey::base(region);
        let mut keys = vec![base];
        keys.extend(base.ancestors(&self.lod));
        for &key in &keys {
            let mut entry = self.state.entry(key).or_default();
            entry.invalidated = true;
            entry.required = entry.required.max(version);
            entry.epoch += 1;
            if let (Some(_), Some(disk)) = (entry.stored, &self.disk) {
                if let Err(e) = disk.mark_stale(key) {
                    warn!("could not persist stale marker for {key}: {e}");
                }
            }
        }
        keys
    }

    /// Whether the stored tile for `key` is older than `current_version` or
    /// otherwise stale. Keys with no tile are stale.
    pub fn is_stale(&self, key: TileKey, current_version: u64) -> bool {
        match self.state(key) {
            None => true,
            Some(s) => s.is_stale() || s.stored.is_some_and(|v| v < current_version),
        }
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            memory_entries: self.memory.lock().unwrap().len(),
            known_tiles: self.state.iter().filter(|e| e.stored.is_some()).count(),
        }
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("lod", &self.lod)
            .field("disk", &self.disk.as_ref().map(|d| d.root().to_path_buf()))
            .field("stats", &self.stats())
            .finish()
    }
}
