use serde::{Deserialize, Serialize};

use crate::coords::{ChunkCoord, RegionCoord};

/// Horizontal partitioning of the world: blocks per chunk edge and chunks per
/// render-region edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldLayout {
    pub chunk_size: usize,
    pub region_chunks: usize,
}

impl Default for WorldLayout {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            region_chunks: 4,
        }
    }
}

impl WorldLayout {
    #[inline]
    pub const fn new(chunk_size: usize, region_chunks: usize) -> Self {
        Self {
            chunk_size,
            region_chunks,
        }
    }

    /// Blocks along one edge of a level-0 region.
    #[inline]
    pub fn region_blocks(&self) -> usize {
        self.chunk_size * self.region_chunks
    }

    #[inline]
    pub fn chunk_of_block(&self, wx: i32, wz: i32) -> ChunkCoord {
        let s = self.chunk_size as i32;
        ChunkCoord::new(wx.div_euclid(s), wz.div_euclid(s))
    }

    #[inline]
    pub fn chunk_origin(&self, coord: ChunkCoord) -> (i32, i32) {
        let s = self.chunk_size as i32;
        (coord.cx * s, coord.cz * s)
    }

    #[inline]
    pub fn region_of_chunk(&self, coord: ChunkCoord) -> RegionCoord {
        let r = self.region_chunks as i32;
        RegionCoord::new(coord.cx.div_euclid(r), coord.cz.div_euclid(r))
    }

    #[inline]
    pub fn region_origin_chunk(&self, region: RegionCoord) -> ChunkCoord {
        let r = self.region_chunks as i32;
        ChunkCoord::new(region.x * r, region.z * r)
    }

    /// Block-space origin `(x, z)` of a level-0 region.
    #[inline]
    pub fn region_origin(&self, region: RegionCoord) -> (i32, i32) {
        self.chunk_origin(self.region_origin_chunk(region))
    }

    /// Chunks of a region, row-major (`cz` outer, `cx` inner).
    pub fn chunks_in_region(&self, region: RegionCoord) -> Vec<ChunkCoord> {
        let base = self.region_origin_chunk(region);
        let r = self.region_chunks as i32;
        let mut out = Vec::with_capacity(self.region_chunks * self.region_chunks);
        for dz in 0..r {
            for dx in 0..r {
                out.push(base.offset(dx, dz));
            }
        }
        out
    }

    /// Chunks directly outside each edge of the region (corners excluded), in
    /// `-X, +X, -Z, +Z` side order. Their boundary columns feed the neighbor
    /// snapshot of a render.
    pub fn ring_chunks(&self, region: RegionCoord) -> Vec<ChunkCoord> {
        let base = self.region_origin_chunk(region);
        let r = self.region_chunks as i32;
        let mut out = Vec::with_capacity(self.region_chunks * 4);
        for dz in 0..r {
            out.push(base.offset(-1, dz));
        }
        for dz in 0..r {
            out.push(base.offset(r, dz));
        }
        for dx in 0..r {
            out.push(base.offset(dx, -1));
        }
        for dx in 0..r {
            out.push(base.offset(dx, r));
        }
        out
    }

    /// Every chunk whose version stamp contributes to a level-0 render of `region`.
    pub fn source_chunks(&self, region: RegionCoord) -> Vec<ChunkCoord> {
        let mut out = self.chunks_in_region(region);
        out.extend(self.ring_chunks(region));
        out
    }

    /// Level-0 regions whose render reads `coord`: its own region, plus the
    /// neighbor across each region edge the chunk touches.
    pub fn regions_reading_chunk(&self, coord: ChunkCoord) -> Vec<RegionCoord> {
        let own = self.region_of_chunk(coord);
        let r = self.region_chunks as i32;
        let lx = coord.cx.rem_euclid(r);
        let lz = coord.cz.rem_euclid(r);
        let mut out = vec![own];
        if lx == 0 {
            out.push(own.offset(-1, 0));
        }
        if lx == r - 1 {
            out.push(own.offset(1, 0));
        }
        if lz == 0 {
            out.push(own.offset(0, -1));
        }
        if lz == r - 1 {
            out.push(own.offset(0, 1));
        }
        out.dedup();
        out
    }
}

/// Detail-level policy: each coarser level aggregates `ratio × ratio` tiles of
/// the next finer level, up to `max_level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodPolicy {
    pub ratio: u32,
    pub max_level: u8,
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            ratio: 2,
            max_level: 4,
        }
    }
}

impl LodPolicy {
    pub const MAX_RATIO: u32 = 8;
    pub const MAX_LEVELS: u8 = 12;

    pub fn is_valid(&self) -> bool {
        (2..=Self::MAX_RATIO).contains(&self.ratio) && self.max_level <= Self::MAX_LEVELS
    }

    /// Level-0 regions along one edge of a tile at `level`.
    #[inline]
    pub fn span(&self, level: u8) -> i64 {
        i64::from(self.ratio).pow(u32::from(level))
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileKey {
    pub region: RegionCoord,
    pub level: u8,
}

impl TileKey {
    #[inline]
    pub const fn new(region: RegionCoord, level: u8) -> Self {
        Self { region, level }
    }

    #[inline]
    pub const fn base(region: RegionCoord) -> Self {
        Self { region, level: 0 }
    }

    #[inline]
    pub fn parent(self, ratio: u32) -> TileKey {
        let r = ratio as i32;
        TileKey {
            region: RegionCoord::new(self.region.x.div_euclid(r), self.region.z.div_euclid(r)),
            level: self.level + 1,
        }
    }

    /// Tiles of the next finer level covered by this tile, row-major.
    /// Empty for level 0.
    pub fn children(self, ratio: u32) -> Vec<TileKey> {
        if self.level == 0 {
            return Vec::new();
        }
        let r = ratio as i32;
        let mut out = Vec::with_capacity((ratio * ratio) as usize);
        for dz in 0..r {
            for dx in 0..r {
                out.push(TileKey {
                    region: RegionCoord::new(self.region.x * r + dx, self.region.z * r + dz),
                    level: self.level - 1,
                });
            }
        }
        out
    }

    /// Position of this tile within its parent's `children` list.
    #[inline]
    pub fn child_slot(self, ratio: u32) -> usize {
        let r = ratio as i32;
        let dx = self.region.x.rem_euclid(r) as usize;
        let dz = self.region.z.rem_euclid(r) as usize;
        dz * ratio as usize + dx
    }

    /// Every coarser tile covering this one, finest first, up to `lod.max_level`.
    pub fn ancestors(self, lod: &LodPolicy) -> Vec<TileKey> {
        let mut out = Vec::new();
        let mut key = self;
        while key.level < lod.max_level {
            key = key.parent(lod.ratio);
            out.push(key);
        }
        out
    }

    /// Block-space `(origin_x, origin_z, edge)` covered by this tile.
    pub fn block_bounds(self, layout: &WorldLayout, lod: &LodPolicy) -> (i64, i64, i64) {
        let edge = layout.region_blocks() as i64 * lod.span(self.level);
        (
            i64::from(self.region.x) * edge,
            i64::from(self.region.z) * edge,
            edge,
        )
    }

    /// Whether the level-0 region lies under this tile.
    pub fn covers(self, region: RegionCoord, lod: &LodPolicy) -> bool {
        let span = lod.span(self.level);
        let x0 = i64::from(self.region.x) * span;
        let z0 = i64::from(self.region.z) * span;
        let (x, z) = (i64::from(region.x), i64::from(region.z));
        x >= x0 && x < x0 + span && z >= z0 && z < z0 + span
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}@{}", self.level, self.region)
    }
}
