use std::sync::Arc;
use std::time::Duration;

use tessera_blocks::{Block, BlockRegistry};
use tessera_chunk::Chunk;
use tessera_io::MemoryChunkStore;
use tessera_runtime::{ChangeSink, DirtyReason, RenderService, RetryPolicy, SchedulerConfig};
use tessera_tiles::{TileCache, TileCacheConfig, TileLookup};
use tessera_world::{ChunkCoord, LodPolicy, RegionCoord, TileKey, WorldLayout};

const LAYOUT: WorldLayout = WorldLayout::new(4, 2);
const LOD: LodPolicy = LodPolicy {
    ratio: 2,
    max_level: 1,
};
const WAIT: Duration = Duration::from_secs(30);

fn ground(coord: ChunkCoord, top: i32) -> Chunk {
    Chunk::from_fn(coord, 4, 0, 8, |_, y, _| {
        if y < top { Block::new(1) } else { Block::AIR }
    })
}

/// Four render regions, (0,0) to (1,1), of 2x2 chunks each.
fn world() -> Arc<MemoryChunkStore> {
    let store = Arc::new(MemoryChunkStore::new());
    for cz in 0..4 {
        for cx in 0..4 {
            store.put(&ground(ChunkCoord::new(cx, cz), 1 + (cx + cz) % 3));
        }
    }
    store
}

fn scheduler() -> SchedulerConfig {
    SchedulerConfig {
        workers: 2,
        queue_capacity: 64,
        retry: RetryPolicy::default(),
        progress_interval_secs: 0,
    }
}

fn service(store: Arc<MemoryChunkStore>, cache: TileCache) -> RenderService {
    RenderService::new(
        store,
        Arc::new(BlockRegistry::builtin()),
        cache,
        LAYOUT,
        &scheduler(),
        usize::MAX,
    )
    .unwrap()
}

fn regions() -> Vec<RegionCoord> {
    vec![
        RegionCoord::new(0, 0),
        RegionCoord::new(1, 0),
        RegionCoord::new(0, 1),
        RegionCoord::new(1, 1),
    ]
}

#[test]
fn startup_renders_every_region_and_its_parent() {
    let svc = service(world(), TileCache::in_memory(64, LOD));
    let report = svc.reconcile_startup().unwrap();
    assert_eq!(report.regions, 4);
    assert_eq!(report.missing, 4);
    assert!(svc.wait_idle(WAIT));

    for region in regions() {
        let tile = svc.get_tile(region, 0).expect("rendered");
        assert!(!tile.incomplete, "{region}");
        assert!(svc.lookup(TileKey::base(region)).is_hit());
    }
    let top = svc.get_tile(RegionCoord::new(0, 0), 1).expect("parent rendered");
    assert!(top.coverage.is_full(LOD.ratio));
    assert!(svc.lookup(top.key).is_hit());

    // nothing left to do on a second pass
    assert_eq!(svc.reconcile_startup().unwrap().queued(), 0);
}

#[test]
fn chunk_change_refreshes_every_reader_of_the_chunk() {
    let store = world();
    let svc = service(store.clone(), TileCache::in_memory(64, LOD));
    svc.reconcile_startup().unwrap();
    assert!(svc.wait_idle(WAIT));
    let before = svc.get_tile(RegionCoord::new(0, 0), 0).unwrap();
    let right_before = svc.get_tile(RegionCoord::new(1, 0), 0).unwrap();

    // (1,1) sits in the +X/+Z corner of region (0,0)
    let coord = ChunkCoord::new(1, 1);
    store.put(&ground(coord, 7));
    svc.notify_region_dirty(LAYOUT.region_of_chunk(coord), DirtyReason::ChunkChanged(coord));
    assert!(svc.wait_idle(WAIT));

    let after = svc.get_tile(RegionCoord::new(0, 0), 0).unwrap();
    assert!(after.version > before.version);
    assert_ne!(after.batch, before.batch);
    let right_after = svc.get_tile(RegionCoord::new(1, 0), 0).unwrap();
    assert!(right_after.version > right_before.version);
    for key in [
        TileKey::base(RegionCoord::new(0, 0)),
        TileKey::base(RegionCoord::new(1, 0)),
        TileKey::base(RegionCoord::new(0, 1)),
        TileKey::new(RegionCoord::new(0, 0), 1),
    ] {
        assert!(svc.lookup(key).is_hit(), "{key}");
    }
    let parent = svc.get_tile(RegionCoord::new(0, 0), 1).unwrap();
    assert!(parent.version >= after.version);
}

#[test]
fn serving_never_renders_missing_tiles() {
    let svc = service(world(), TileCache::in_memory(64, LOD));
    assert!(matches!(
        svc.lookup(TileKey::base(RegionCoord::new(0, 0))),
        TileLookup::Miss
    ));
    assert!(svc.get_tile(RegionCoord::new(1, 1), 0).is_none());
    assert!(svc.wait_idle(WAIT));
    assert_eq!(svc.stats().scheduler.completed, 0);
}

#[test]
fn outdated_tiles_are_served_marked_stale() {
    let store = world();
    let svc = service(store.clone(), TileCache::in_memory(64, LOD));
    svc.reconcile_startup().unwrap();
    assert!(svc.wait_idle(WAIT));
    let region = RegionCoord::new(0, 0);
    let fresh = svc.get_tile(region, 0).unwrap();
    assert!(!fresh.is_stale());

    // no workers left to refresh it
    svc.shutdown();
    let coord = ChunkCoord::new(0, 0);
    store.put(&ground(coord, 6));
    svc.notify_region_dirty(region, DirtyReason::ChunkChanged(coord));

    let served = svc.get_tile(region, 0).unwrap();
    assert!(served.is_stale());
    assert_eq!(served.version, fresh.version);
    assert!(svc.get_tile(region, 1).unwrap().is_stale());
    assert!(!svc.get_tile(RegionCoord::new(1, 1), 0).unwrap().is_stale());
}

#[test]
fn dirty_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = TileCacheConfig {
        root: Some(dir.path().to_path_buf()),
        memory_tiles: 16,
    };
    let store = world();
    {
        let svc = service(store.clone(), TileCache::open(&config, LOD).unwrap());
        svc.reconcile_startup().unwrap();
        assert!(svc.wait_idle(WAIT));
        svc.shutdown();
        // lands after the workers are gone: only the stale markers remain
        svc.notify_region_dirty(
            RegionCoord::new(0, 0),
            DirtyReason::ChunkChanged(ChunkCoord::new(0, 0)),
        );
    }

    let svc = service(store, TileCache::open(&config, LOD).unwrap());
    assert!(svc.cache().high_water_mark() > 0);
    let report = svc.reconcile_startup().unwrap();
    assert_eq!(report.regions, 4);
    assert_eq!(report.missing, 0);
    assert_eq!(report.stale, 1);
    assert!(svc.wait_idle(WAIT));
    assert!(svc.lookup(TileKey::base(RegionCoord::new(0, 0))).is_hit());
    assert!(svc.lookup(TileKey::new(RegionCoord::new(0, 0), 1)).is_hit());
}

#[test]
fn unreadable_chunks_leave_a_placeholder_until_the_next_change() {
    let store = world();
    let svc = service(store.clone(), TileCache::in_memory(64, LOD));
    let coord = ChunkCoord::new(2, 0);
    store.fail_reads(coord);
    svc.reconcile_startup().unwrap();
    assert!(svc.wait_idle(WAIT));

    let region = LAYOUT.region_of_chunk(coord);
    assert!(svc.get_tile(region, 0).unwrap().incomplete);
    // region (0,0) reads the chunk through its +X ring
    assert!(svc.get_tile(RegionCoord::new(0, 0), 0).unwrap().incomplete);
    assert!(matches!(svc.lookup(TileKey::base(region)), TileLookup::Stale(_)));

    store.heal(coord);
    svc.notify_region_dirty(region, DirtyReason::ChunkChanged(coord));
    assert!(svc.wait_idle(WAIT));
    assert!(!svc.get_tile(region, 0).unwrap().incomplete);
    assert!(svc.lookup(TileKey::base(RegionCoord::new(0, 0))).is_hit());
}
