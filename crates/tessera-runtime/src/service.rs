use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tessera_blocks::BlockRegistry;
use tessera_io::{ChunkReader, ChunkStore, ReaderStats, RegionFileStore};
use tessera_tiles::{ServedTile, TileAssembler, TileCache, TileCacheStats, TileLookup};
use tessera_world::{ChunkCoord, LodPolicy, RegionCoord, TileKey, VersionClock, WorldLayout};

use crate::config::TesseraConfig;
use crate::error::RuntimeError;
use crate::event::{ChangeSink, DirtyReason, DirtyRegionEvent};
use crate::pipeline::TilePipeline;
use crate::scheduler::{RegionStatus, RenderScheduler, SchedulerConfig, SchedulerStats};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Level-0 regions that hold at least one chunk.
    pub regions: usize,
    pub missing: usize,
    pub stale: usize,
    /// Stored as fresh but older than a chunk's storage timestamp.
    pub outdated: usize,
    pub ancestors: usize,
}

impl ReconcileReport {
    pub fn queued(&self) -> usize {
        self.missing + self.stale + self.outdated + self.ancestors
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub scheduler: SchedulerStats,
    pub cache: TileCacheStats,
    pub reader: ReaderStats,
}

/// The assembled pipeline: world reader, tile cache and render scheduler
/// behind a dirty-notification and tile-serving surface.
pub struct RenderService {
    layout: WorldLayout,
    lod: LodPolicy,
    reader: Arc<ChunkReader>,
    cache: Arc<TileCache>,
    scheduler: RenderScheduler,
}

impl RenderService {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        registry: Arc<BlockRegistry>,
        cache: TileCache,
        layout: WorldLayout,
        scheduler: &SchedulerConfig,
        reader_budget_bytes: usize,
    ) -> Result<Self, RuntimeError> {
        let lod = *cache.lod();
        // Stamps continue above anything already on disk.
        let clock = Arc::new(VersionClock::starting_after(cache.high_water_mark()));
        let reader = Arc::new(ChunkReader::new(store, layout, clock, reader_budget_bytes));
        let cache = Arc::new(cache);
        let assembler = TileAssembler::new(layout, lod, registry);
        let pipeline = Arc::new(TilePipeline::new(reader.clone(), cache.clone(), assembler));
        let scheduler = RenderScheduler::start(scheduler, lod, pipeline)?;
        Ok(Self {
            layout,
            lod,
            reader,
            cache,
            scheduler,
        })
    }

    /// Region-file store, registry and tile cache as configured.
    pub fn from_config(cfg: &TesseraConfig) -> Result<Self, RuntimeError> {
        cfg.validate()?;
        let registry = match (&cfg.world.materials, &cfg.world.blocks) {
            (Some(materials), Some(blocks)) => BlockRegistry::load_from_paths(materials, blocks)?,
            _ => BlockRegistry::builtin(),
        };
        info!(
            "world {} ({} block types), tiles {}",
            cfg.world.region_dir.display(),
            registry.len(),
            cfg.cache
                .root
                .as_ref()
                .map_or_else(|| "in memory".to_string(), |p| p.display().to_string())
        );
        let store = Arc::new(RegionFileStore::new(&cfg.world.region_dir));
        let cache = TileCache::open(&cfg.cache, cfg.lod)?;
        Self::new(
            store,
            Arc::new(registry),
            cache,
            cfg.layout,
            &cfg.scheduler,
            cfg.world.reader_budget_bytes(),
        )
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn lod(&self) -> &LodPolicy {
        &self.lod
    }

    pub fn reader(&self) -> &Arc<ChunkReader> {
        &self.reader
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    /// Invalidates what the event's reason implies and schedules the affected
    /// regions. Changed chunks dirty every region whose render reads them.
    pub fn notify(&self, event: DirtyRegionEvent) {
        match event.reason {
            DirtyReason::ChunkChanged(coord) => self.chunks_changed(&[coord], event),
            DirtyReason::RegionChanged | DirtyReason::Manual => {
                let chunks = self.layout.chunks_in_region(event.region);
                self.chunks_changed(&chunks, event)
            }
            DirtyReason::Startup | DirtyReason::StaleServed => {
                self.scheduler.enqueue(event);
            }
        }
    }

    fn chunks_changed(&self, coords: &[ChunkCoord], event: DirtyRegionEvent) {
        let mut affected: BTreeMap<RegionCoord, u64> = BTreeMap::new();
        for &coord in coords {
            let stamp = self.reader.invalidate(coord);
            for region in self.layout.regions_reading_chunk(coord) {
                let v = affected.entry(region).or_insert(0);
                *v = (*v).max(stamp);
            }
        }
        for (region, stamp) in affected {
            self.cache.invalidate_to(region, stamp);
            let outcome = self.scheduler.enqueue(DirtyRegionEvent { region, ..event });
            debug!("{region} dirty at v{stamp}: {outcome:?}");
        }
    }

    /// Cache lookup for serving. Stale tiles are returned as such and their
    /// key is scheduled; misses never render.
    pub fn lookup(&self, key: TileKey) -> TileLookup {
        let found = self.cache.get(key);
        if let TileLookup::Stale(_) = &found {
            self.scheduler
                .enqueue_key(key, DirtyReason::StaleServed.default_priority());
        }
        found
    }

    /// The stored tile for `region` at `level`. A stale tile comes back with
    /// `stale` set and is scheduled for a refresh.
    pub fn get_tile(&self, region: RegionCoord, level: u8) -> Option<ServedTile> {
        self.lookup(TileKey::new(region, level)).served()
    }

    /// Level-0 regions holding at least one stored chunk.
    pub fn world_regions(&self) -> Result<BTreeSet<RegionCoord>, RuntimeError> {
        let chunks = self.reader.store().list_chunks()?;
        Ok(chunks
            .into_iter()
            .map(|c| self.layout.region_of_chunk(c))
            .collect())
    }

    /// Invalidates and schedules every region of the world.
    pub fn render_all(&self) -> Result<usize, RuntimeError> {
        let regions = self.world_regions()?;
        for &region in &regions {
            self.cache.invalidate(region);
            self.scheduler
                .enqueue(DirtyRegionEvent::new(region, DirtyReason::Startup));
        }
        info!("scheduled {} regions for a full render", regions.len());
        Ok(regions.len())
    }

    /// Schedules regions whose tiles are missing, marked stale, or older than
    /// the storage timestamps of their chunks, plus stale coarser tiles that
    /// no scheduled region will refresh.
    pub fn reconcile_startup(&self) -> Result<ReconcileReport, RuntimeError> {
        let store = self.reader.store();
        let chunks = store.list_chunks()?;
        let regions: BTreeSet<RegionCoord> = chunks
            .iter()
            .map(|&c| self.layout.region_of_chunk(c))
            .collect();
        let mut newest: BTreeMap<RegionCoord, u64> = BTreeMap::new();
        for &coord in &chunks {
            let Some(secs) = store.modified_at(coord)? else {
                continue;
            };
            for region in self.layout.regions_reading_chunk(coord) {
                if regions.contains(&region) {
                    let v = newest.entry(region).or_insert(0);
                    *v = (*v).max(secs);
                }
            }
        }

        let mut report = ReconcileReport {
            regions: regions.len(),
            ..ReconcileReport::default()
        };
        let mut queued_ancestors = BTreeSet::new();
        let mut all_ancestors = BTreeSet::new();
        for &region in &regions {
            let key = TileKey::base(region);
            let ancestors = key.ancestors(&self.lod);
            let dirty = match self.cache.get(key) {
                TileLookup::Miss => {
                    report.missing += 1;
                    true
                }
                TileLookup::Stale(_) => {
                    report.stale += 1;
                    true
                }
                TileLookup::Hit(tile) => {
                    let changed = newest
                        .get(&region)
                        .is_some_and(|&secs| secs.saturating_mul(1000) > tile.rendered_at_ms);
                    if changed {
                        report.outdated += 1;
                        self.cache.invalidate(region);
                    }
                    changed
                }
            };
            if dirty {
                self.scheduler
                    .enqueue(DirtyRegionEvent::new(region, DirtyReason::Startup));
                queued_ancestors.extend(ancestors.iter().copied());
            }
            all_ancestors.extend(ancestors);
        }
        // Coarser tiles above a scheduled region are rebuilt when it completes.
        for key in all_ancestors.difference(&queued_ancestors) {
            if !self.cache.get(*key).is_hit() {
                report.ancestors += 1;
                self.scheduler
                    .enqueue_key(*key, DirtyReason::Startup.default_priority());
            }
        }
        info!(
            "startup: {} regions, {} missing, {} stale, {} outdated, {} coarse tiles",
            report.regions, report.missing, report.stale, report.outdated, report.ancestors
        );
        Ok(report)
    }

    pub fn status(&self, key: TileKey) -> RegionStatus {
        self.scheduler.status(key)
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            reader: self.reader.stats(),
        }
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl ChangeSink for RenderService {
    fn notify_region_dirty(&self, region: RegionCoord, reason: DirtyReason) {
        self.notify(DirtyRegionEvent::new(region, reason));
    }

    fn notify_event(&self, event: DirtyRegionEvent) {
        self.notify(event);
    }
}

impl std::fmt::Debug for RenderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderService")
            .field("layout", &self.layout)
            .field("lod", &self.lod)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
