use std::sync::Arc;
use std::time::Instant;

use log::debug;
use tessera_io::ChunkReader;
use tessera_tiles::{PutOutcome, Tile, TileAssembler, TileCache};
use tessera_world::TileKey;

use crate::error::RenderError;
use crate::scheduler::{RenderJob, RenderOutcome};

/// Renders one tile and publishes it: level 0 from the world reader, coarser
/// levels from whatever children the cache holds.
pub struct TilePipeline {
    reader: Arc<ChunkReader>,
    cache: Arc<TileCache>,
    assembler: TileAssembler,
}

impl TilePipeline {
    pub fn new(reader: Arc<ChunkReader>, cache: Arc<TileCache>, assembler: TileAssembler) -> Self {
        Self {
            reader,
            cache,
            assembler,
        }
    }

    pub fn build_tile(&self, key: TileKey) -> Tile {
        if key.level == 0 {
            return self.assembler.render_base(&self.reader, key.region);
        }
        // Stale children still count; the parent is re-rendered when they are.
        let children: Vec<Arc<Tile>> = key
            .children(self.assembler.lod().ratio)
            .into_iter()
            .filter_map(|child| self.cache.get(child).tile().cloned())
            .collect();
        self.assembler.assemble_parent(key, &children)
    }
}

impl RenderJob for TilePipeline {
    fn render(&self, key: TileKey) -> Result<RenderOutcome, RenderError> {
        let t0 = Instant::now();
        let tile = self.build_tile(key);
        let version = tile.version;
        let incomplete = tile.incomplete;
        let quads = tile.batch.quad_count();
        let put = self
            .cache
            .put(tile)
            .map_err(|source| RenderError::CacheWrite { key, source })?;
        debug!(
            "{key} v{version}: {quads} quads in {}ms{}",
            t0.elapsed().as_millis(),
            if incomplete { " (incomplete)" } else { "" }
        );
        Ok(RenderOutcome {
            version,
            incomplete,
            superseded: matches!(put, PutOutcome::Superseded { .. }),
        })
    }
}
