use std::sync::Arc;

use tessera_blocks::Block;
use tessera_chunk::Chunk;
use tessera_world::{ChunkCoord, RegionCoord, WorldLayout};

/// What the caller could obtain for one chunk of the snapshot.
#[derive(Clone, Debug)]
pub enum ChunkSlot {
    Loaded(Arc<Chunk>),
    /// The chunk does not exist (world edge) or had to be skipped.
    Absent,
    /// The load failed; the render must be retried later.
    Unavailable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NeighborSide {
    Present,
    Absent,
    Unavailable,
}

/// Sample of the snapshot volume. `Unknown` marks cells with no data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    Block(Block),
    Unknown,
}

/// A region's blocks plus a one-block apron copied from the neighbor chunks on
/// the four sides. Local coordinates run `-1..=n` horizontally and `0..height`
/// vertically, where `n` is the region's edge length in blocks.
#[derive(Clone, Debug)]
pub struct RegionSnapshot {
    pub region: RegionCoord,
    pub origin: (i32, i32),
    pub edge: usize,
    pub min_y: i32,
    pub height: usize,
    /// Side status in `-X, +X, -Z, +Z` order.
    pub sides: [NeighborSide; 4],
    pub own_unavailable: Vec<ChunkCoord>,
    pub chunks_loaded: usize,
    cells: Vec<Block>,
    known: Vec<bool>,
}

impl RegionSnapshot {
    /// Copies the region and its apron out of whatever `fetch` hands back.
    /// Ring chunks are only consulted for the column strip touching the region.
    pub fn build(
        layout: &WorldLayout,
        region: RegionCoord,
        mut fetch: impl FnMut(ChunkCoord) -> ChunkSlot,
    ) -> Self {
        let own: Vec<(ChunkCoord, ChunkSlot)> = layout
            .chunks_in_region(region)
            .into_iter()
            .map(|c| (c, fetch(c)))
            .collect();
        let ring: Vec<(ChunkCoord, ChunkSlot)> = layout
            .ring_chunks(region)
            .into_iter()
            .map(|c| (c, fetch(c)))
            .collect();

        let loaded = || {
            own.iter().chain(ring.iter()).filter_map(|(_, s)| match s {
                ChunkSlot::Loaded(c) => Some(c),
                _ => None,
            })
        };
        let (min_y, max_y) = loaded().fold(None, |acc: Option<(i32, i32)>, c| match acc {
            None => Some((c.min_y, c.max_y())),
            Some((lo, hi)) => Some((lo.min(c.min_y), hi.max(c.max_y()))),
        })
        .unwrap_or((0, 0));

        let edge = layout.region_blocks();
        let mut snap = Self {
            region,
            origin: layout.region_origin(region),
            edge,
            min_y,
            height: (max_y - min_y) as usize,
            sides: [NeighborSide::Present; 4],
            own_unavailable: Vec::new(),
            chunks_loaded: 0,
            cells: vec![Block::AIR; (edge + 2) * (edge + 2) * (max_y - min_y) as usize],
            known: vec![false; (edge + 2) * (edge + 2)],
        };

        for (coord, slot) in &own {
            match slot {
                ChunkSlot::Loaded(chunk) => snap.copy_chunk(chunk, false),
                ChunkSlot::Absent => {}
                ChunkSlot::Unavailable => snap.own_unavailable.push(*coord),
            }
        }
        let r = layout.region_chunks;
        for (side, strip) in ring.chunks(r.max(1)).enumerate().take(4) {
            let mut status = NeighborSide::Present;
            for (_, slot) in strip {
                match slot {
                    ChunkSlot::Loaded(chunk) => snap.copy_chunk(chunk, true),
                    ChunkSlot::Absent if status == NeighborSide::Present => {
                        status = NeighborSide::Absent
                    }
                    ChunkSlot::Absent => {}
                    ChunkSlot::Unavailable => status = NeighborSide::Unavailable,
                }
            }
            snap.sides[side] = status;
        }
        snap
    }

    /// True when a retry could produce a different mesh.
    pub fn is_incomplete(&self) -> bool {
        !self.own_unavailable.is_empty() || self.sides.contains(&NeighborSide::Unavailable)
    }

    #[inline]
    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    #[inline]
    fn column(&self, lx: i32, lz: i32) -> Option<usize> {
        let n = self.edge as i32;
        if lx < -1 || lx > n || lz < -1 || lz > n {
            return None;
        }
        Some((lz + 1) as usize * (self.edge + 2) + (lx + 1) as usize)
    }

    /// Cell at local `(lx, ly, lz)`. Above the volume is open air; below it and
    /// outside any copied column is unknown.
    #[inline]
    pub fn cell(&self, lx: i32, ly: i32, lz: i32) -> Cell {
        let Some(col) = self.column(lx, lz) else {
            return Cell::Unknown;
        };
        if !self.known[col] || ly < 0 {
            return Cell::Unknown;
        }
        if ly >= self.height as i32 {
            return Cell::Block(Block::AIR);
        }
        Cell::Block(self.cells[ly as usize * self.known.len() + col])
    }

    /// Block inside the region proper (`0..n` horizontally).
    #[inline]
    pub fn block(&self, lx: usize, ly: usize, lz: usize) -> Block {
        self.cells[ly * self.known.len() + (lz + 1) * (self.edge + 2) + lx + 1]
    }

    #[inline]
    pub fn is_known(&self, lx: i32, lz: i32) -> bool {
        self.column(lx, lz).is_some_and(|c| self.known[c])
    }

    fn copy_chunk(&mut self, chunk: &Chunk, with_apron: bool) {
        let n = self.edge as i32;
        let (bx, bz) = chunk.origin();
        let layer = self.known.len();
        for lz in 0..chunk.size {
            for lx in 0..chunk.size {
                let x = bx + lx as i32 - self.origin.0;
                let z = bz + lz as i32 - self.origin.1;
                let inside = (0..n).contains(&x) && (0..n).contains(&z);
                let apron = !inside
                    && (((x == -1 || x == n) && (0..n).contains(&z))
                        || ((z == -1 || z == n) && (0..n).contains(&x)));
                if !(inside || (apron && with_apron)) {
                    continue;
                }
                let Some(col) = self.column(x, z) else {
                    continue;
                };
                self.known[col] = true;
                let column = chunk.column(lx, lz);
                let offset = (chunk.min_y - self.min_y) as usize;
                for (i, block) in column.blocks().iter().enumerate() {
                    self.cells[(offset + i) * layer + col] = *block;
                }
            }
        }
        self.chunks_loaded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: WorldLayout = WorldLayout::new(2, 2);

    fn solid(coord: ChunkCoord) -> ChunkSlot {
        ChunkSlot::Loaded(Arc::new(Chunk::from_fn(coord, 2, 0, 2, |_, _, _| Block::new(1))))
    }

    #[test]
    fn apron_comes_from_ring_chunks_only() {
        let snap = RegionSnapshot::build(&LAYOUT, RegionCoord::new(0, 0), solid);
        assert_eq!(snap.sides, [NeighborSide::Present; 4]);
        assert!(snap.is_known(-1, 0));
        assert!(snap.is_known(4, 3));
        assert!(!snap.is_known(-1, -1));
        assert_eq!(snap.cell(0, 5, 0), Cell::Block(Block::AIR));
        assert_eq!(snap.cell(0, -1, 0), Cell::Unknown);
        assert_eq!(snap.cell(-1, 0, 2), Cell::Block(Block::new(1)));
        assert_eq!(snap.chunks_loaded, 4 + 8);
    }

    #[test]
    fn side_status_tracks_the_worst_chunk() {
        let snap = RegionSnapshot::build(&LAYOUT, RegionCoord::new(0, 0), |c| {
            if c.cx < 0 {
                ChunkSlot::Absent
            } else if c.cz < 0 {
                ChunkSlot::Unavailable
            } else {
                solid(c)
            }
        });
        assert_eq!(
            snap.sides,
            [
                NeighborSide::Absent,
                NeighborSide::Present,
                NeighborSide::Unavailable,
                NeighborSide::Present
            ]
        );
        assert!(snap.is_incomplete());
        assert!(snap.own_unavailable.is_empty());
    }
}
