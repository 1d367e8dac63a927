use std::sync::Arc;

use log::{debug, warn};
use tessera_blocks::BlockRegistry;
use tessera_io::{ChunkPin, ChunkReader, ReadError};
use tessera_mesh_cpu::{ChunkSlot, MeshBatch, RegionSnapshot, TileBounds, build_mesh, downsample};
use tessera_world::{ChunkCoord, LodPolicy, RegionCoord, TileKey, WorldLayout};

use crate::tile::{Coverage, Tile, now_ms};

/// What a render saw of the world: the snapshot plus the highest chunk stamp
/// observed while taking it. Every chunk read stays pinned in the reader until
/// the source is dropped.
#[derive(Debug)]
pub struct RegionSource {
    pub snapshot: RegionSnapshot,
    pub version: u64,
    pub corrupt: Vec<ChunkCoord>,
    pub failed: Vec<ChunkCoord>,
    pub pins: Vec<ChunkPin>,
}

/// Turns world data into tiles: level 0 from chunk snapshots, coarser levels
/// from their children.
#[derive(Clone, Debug)]
pub struct TileAssembler {
    layout: WorldLayout,
    lod: LodPolicy,
    registry: Arc<BlockRegistry>,
}

impl TileAssembler {
    pub fn new(layout: WorldLayout, lod: LodPolicy, registry: Arc<BlockRegistry>) -> Self {
        Self {
            layout,
            lod,
            registry,
        }
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn lod(&self) -> &LodPolicy {
        &self.lod
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Loads the region and its neighbor ring through the reader. Corrupt
    /// chunks become gaps; I/O failures leave their slot unavailable.
    pub fn snapshot_region(&self, reader: &ChunkReader, region: RegionCoord) -> RegionSource {
        let mut version = 0;
        let mut corrupt = Vec::new();
        let mut failed = Vec::new();
        let mut pins = Vec::new();
        let snapshot = RegionSnapshot::build(&self.layout, region, |coord| {
            let load = reader.load_pinned(coord);
            version = version.max(load.stamp);
            match load.result {
                Ok(pin) => {
                    let chunk = pin.chunk().clone();
                    pins.push(pin);
                    ChunkSlot::Loaded(chunk)
                }
                Err(ReadError::NotFound) => ChunkSlot::Absent,
                Err(ReadError::CorruptData(reason)) => {
                    warn!("chunk {coord} skipped in region {region}: {reason}");
                    corrupt.push(coord);
                    ChunkSlot::Absent
                }
                Err(ReadError::Io(e)) => {
                    warn!("chunk {coord} unavailable for region {region}: {e}");
                    failed.push(coord);
                    ChunkSlot::Unavailable
                }
            }
        });
        RegionSource {
            snapshot,
            version,
            corrupt,
            failed,
            pins,
        }
    }

    /// Snapshot, mesh and assemble the level-0 tile of `region`.
    pub fn render_base(&self, reader: &ChunkReader, region: RegionCoord) -> Tile {
        let source = self.snapshot_region(reader, region);
        let batch = build_mesh(&source.snapshot, &self.registry);
        debug!(
            "region {region}: {} chunks ({} pinned), {} quads, v{}",
            source.snapshot.chunks_loaded,
            source.pins.len(),
            batch.quad_count(),
            source.version
        );
        self.assemble(batch, region, 0, source.version)
    }

    pub fn assemble(&self, batch: MeshBatch, region: RegionCoord, level: u8, version: u64) -> Tile {
        Tile {
            key: TileKey::new(region, level),
            version,
            rendered_at_ms: now_ms(),
            incomplete: batch.incomplete,
            coverage: Coverage::SELF,
            batch,
        }
    }

    /// Aggregates whichever children exist into the tile for `key`. Missing
    /// children (world edge) leave their coverage bit clear.
    pub fn assemble_parent(&self, key: TileKey, children: &[Arc<Tile>]) -> Tile {
        let ratio = self.lod.ratio;
        let mut coverage = Coverage::default();
        let mut version = 0;
        let mut incomplete = false;
        let mut batches: Vec<&MeshBatch> = Vec::with_capacity(children.len());
        for child in children {
            if child.key.level + 1 != key.level || child.key.parent(ratio) != key {
                warn!("{} is not a child of {key}, ignoring", child.key);
                continue;
            }
            coverage = coverage.with(child.key.child_slot(ratio));
            version = version.max(child.version);
            incomplete |= child.incomplete;
            batches.push(&child.batch);
        }
        let bounds = TileBounds::of_key(key, &self.layout, &self.lod);
        let batch = downsample(bounds, &batches, ratio, &self.registry.materials);
        Tile {
            key,
            version,
            rendered_at_ms: now_ms(),
            incomplete: incomplete || batch.incomplete,
            coverage,
            batch,
        }
    }
}
