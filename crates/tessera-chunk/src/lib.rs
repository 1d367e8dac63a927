//! Loaded chunk data: block columns, chunks and the chunk payload codec.
#![forbid(unsafe_code)]

pub mod codec;

use tessera_blocks::Block;
use tessera_world::ChunkCoord;

pub use codec::{ChunkDecodeError, decode_chunk, encode_chunk};

/// One block-state entry of a column.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockEntry {
    pub block: Block,
    pub light: u8,
    pub biome: u8,
}

/// Blocks of one vertical column, bottom to top. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockColumn {
    biome: u8,
    blocks: Vec<Block>,
    light: Vec<u8>,
}

impl BlockColumn {
    /// `light` shorter than `blocks` is padded with full brightness.
    pub fn new(biome: u8, blocks: Vec<Block>, mut light: Vec<u8>) -> Self {
        light.resize(blocks.len(), 15);
        Self {
            biome,
            blocks,
            light,
        }
    }

    pub fn filled(height: usize, block: Block) -> Self {
        Self::new(0, vec![block; height], Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn biome(&self) -> u8 {
        self.biome
    }

    /// Block at index `i` from the bottom; air above the column.
    #[inline]
    pub fn block(&self, i: usize) -> Block {
        self.blocks.get(i).copied().unwrap_or(Block::AIR)
    }

    pub fn entry(&self, i: usize) -> Option<BlockEntry> {
        Some(BlockEntry {
            block: *self.blocks.get(i)?,
            light: self.light[i],
            biome: self.biome,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = BlockEntry> + '_ {
        self.blocks
            .iter()
            .zip(self.light.iter())
            .map(move |(b, l)| BlockEntry {
                block: *b,
                light: *l,
                biome: self.biome,
            })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn light(&self) -> &[u8] {
        &self.light
    }

    /// Index of the highest non-air block.
    pub fn top(&self) -> Option<usize> {
        self.blocks.iter().rposition(|b| !b.is_air())
    }
}

/// `size × size` columns sharing the height range `[min_y, min_y + height)`.
/// `version` is assigned by the chunk reader, not stored in the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub coord: ChunkCoord,
    pub size: usize,
    pub min_y: i32,
    pub height: usize,
    pub version: u64,
    columns: Vec<BlockColumn>,
}

impl Chunk {
    /// Columns are row-major by `z` then `x`; missing columns become air and
    /// columns of the wrong height are padded or cut.
    pub fn new(
        coord: ChunkCoord,
        size: usize,
        min_y: i32,
        height: usize,
        mut columns: Vec<BlockColumn>,
    ) -> Self {
        columns.resize(size * size, BlockColumn::filled(height, Block::AIR));
        for col in columns.iter_mut() {
            if col.len() != height {
                col.blocks.resize(height, Block::AIR);
                col.light.resize(height, 15);
            }
        }
        Self {
            coord,
            size,
            min_y,
            height,
            version: 0,
            columns,
        }
    }

    pub fn from_fn(
        coord: ChunkCoord,
        size: usize,
        min_y: i32,
        height: usize,
        mut f: impl FnMut(usize, i32, usize) -> Block,
    ) -> Self {
        let mut columns = Vec::with_capacity(size * size);
        for lz in 0..size {
            for lx in 0..size {
                let blocks = (0..height)
                    .map(|i| f(lx, min_y + i as i32, lz))
                    .collect::<Vec<_>>();
                columns.push(BlockColumn::new(0, blocks, Vec::new()));
            }
        }
        Self::new(coord, size, min_y, height, columns)
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[inline]
    pub fn column_index(&self, lx: usize, lz: usize) -> usize {
        lz * self.size + lx
    }

    #[inline]
    pub fn column(&self, lx: usize, lz: usize) -> &BlockColumn {
        &self.columns[self.column_index(lx, lz)]
    }

    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    #[inline]
    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    #[inline]
    pub fn origin(&self) -> (i32, i32) {
        (
            self.coord.cx * self.size as i32,
            self.coord.cz * self.size as i32,
        )
    }

    /// Block at local column `(lx, lz)` and world height `wy`; air outside the
    /// height range.
    #[inline]
    pub fn block_local(&self, lx: usize, wy: i32, lz: usize) -> Block {
        if wy < self.min_y || wy >= self.max_y() {
            return Block::AIR;
        }
        self.column(lx, lz).block((wy - self.min_y) as usize)
    }

    #[inline]
    pub fn contains_world(&self, wx: i32, wz: i32) -> bool {
        let (bx, bz) = self.origin();
        let s = self.size as i32;
        wx >= bx && wx < bx + s && wz >= bz && wz < bz + s
    }

    /// Block at world coordinates, or `None` when `(wx, wz)` lies in another chunk.
    #[inline]
    pub fn block_world(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        if !self.contains_world(wx, wz) {
            return None;
        }
        let (bx, bz) = self.origin();
        Some(self.block_local((wx - bx) as usize, wy, (wz - bz) as usize))
    }

    pub fn has_non_air(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.blocks.iter().any(|b| !b.is_air()))
    }

    /// Rough resident size, used for the reader's memory budget.
    pub fn approx_bytes(&self) -> usize {
        let per_block = std::mem::size_of::<Block>() + 1;
        std::mem::size_of::<Chunk>()
            + self.columns.len() * (std::mem::size_of::<BlockColumn>() + self.height * per_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_world_respects_chunk_bounds() {
        let stone = Block::new(1);
        let chunk = Chunk::from_fn(ChunkCoord::new(-1, 2), 4, -8, 16, |_, y, _| {
            if y < 0 { stone } else { Block::AIR }
        });
        assert_eq!(chunk.origin(), (-4, 8));
        assert_eq!(chunk.block_world(-4, -1, 8), Some(stone));
        assert_eq!(chunk.block_world(-1, 0, 11), Some(Block::AIR));
        assert_eq!(chunk.block_world(0, -1, 8), None);
        assert_eq!(chunk.block_world(-4, -9, 8), Some(Block::AIR));
        assert_eq!(chunk.block_world(-4, 100, 8), Some(Block::AIR));
        assert_eq!(chunk.column(0, 0).top(), Some(7));
    }

    #[test]
    fn short_columns_are_padded_with_air() {
        let col = BlockColumn::new(3, vec![Block::new(2)], vec![]);
        let chunk = Chunk::new(ChunkCoord::new(0, 0), 2, 0, 4, vec![col]);
        assert_eq!(chunk.columns().len(), 4);
        assert_eq!(chunk.column(0, 0).len(), 4);
        assert_eq!(chunk.column(0, 0).block(0), Block::new(2));
        assert_eq!(chunk.column(0, 0).block(1), Block::AIR);
        assert_eq!(chunk.column(0, 0).entry(0).unwrap().biome, 3);
        assert!(chunk.column(1, 1).top().is_none());
    }
}
