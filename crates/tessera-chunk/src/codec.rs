//! Chunk payload format (`TSCK`), little endian:
//!
//! | size | field |
//! |------|-------|
//! | 4 | magic `TSCK` |
//! | 1 | format version (1) |
//! | 4 + 4 | chunk `cx`, `cz` (`i32`) |
//! | 2 | chunk size (`u16`) |
//! | 2 | `min_y` (`i16`) |
//! | 2 | height (`u16`) |
//! | 2 | palette length `N` (`u16`) |
//! | N×4 | palette entries (`id: u16`, `state: u16`) |
//! | 1 | index width in bits (8 or 16) |
//! | size²×height×w | palette indices, column-major (columns by `z` then `x`, bottom to top) |
//! | size² | biome per column |
//! | size²×height | light per block |

use std::collections::HashMap;

use tessera_blocks::Block;
use tessera_world::ChunkCoord;
use thiserror::Error;

use crate::{BlockColumn, Chunk};

const MAGIC: [u8; 4] = *b"TSCK";
const FORMAT_VERSION: u8 = 1;
const MAX_CHUNK_SIZE: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkDecodeError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("invalid dimensions: size {size}, height {height}")]
    InvalidDimensions { size: usize, height: usize },
    #[error("invalid index width: {0}")]
    InvalidIndexWidth(u8),
    #[error("palette index {index} out of range (palette has {len} entries)")]
    PaletteIndex { index: usize, len: usize },
    #[error("{0} trailing bytes after chunk payload")]
    TrailingBytes(usize),
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ChunkDecodeError> {
        let end = self.pos.checked_add(n).ok_or(ChunkDecodeError::Truncated {
            expected: usize::MAX,
            actual: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(ChunkDecodeError::Truncated {
                expected: end,
                actual: self.data.len(),
            });
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ChunkDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ChunkDecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, ChunkDecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, ChunkDecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

pub fn encode_chunk(chunk: &Chunk) -> Vec<u8> {
    let mut palette: Vec<Block> = Vec::new();
    let mut lookup: HashMap<Block, u16> = HashMap::new();
    let mut indices: Vec<u16> = Vec::with_capacity(chunk.columns().len() * chunk.height);
    for col in chunk.columns() {
        for b in col.blocks() {
            let idx = *lookup.entry(*b).or_insert_with(|| {
                palette.push(*b);
                (palette.len() - 1) as u16
            });
            indices.push(idx);
        }
    }
    let width: u8 = if palette.len() <= 256 { 8 } else { 16 };

    let cols = chunk.columns().len();
    let mut out = Vec::with_capacity(
        22 + palette.len() * 4 + indices.len() * (width as usize / 8) + cols + indices.len(),
    );
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&chunk.coord.cx.to_le_bytes());
    out.extend_from_slice(&chunk.coord.cz.to_le_bytes());
    out.extend_from_slice(&(chunk.size as u16).to_le_bytes());
    out.extend_from_slice(&(chunk.min_y as i16).to_le_bytes());
    out.extend_from_slice(&(chunk.height as u16).to_le_bytes());
    out.extend_from_slice(&(palette.len() as u16).to_le_bytes());
    for b in &palette {
        out.extend_from_slice(&b.id.to_le_bytes());
        out.extend_from_slice(&b.state.to_le_bytes());
    }
    out.push(width);
    for i in &indices {
        if width == 8 {
            out.push(*i as u8);
        } else {
            out.extend_from_slice(&i.to_le_bytes());
        }
    }
    for col in chunk.columns() {
        out.push(col.biome());
    }
    for col in chunk.columns() {
        out.extend_from_slice(col.light());
    }
    out
}

/// Decodes a payload. The returned chunk has version 0; stamping is the
/// reader's job. Never panics on malformed input.
pub fn decode_chunk(data: &[u8]) -> Result<Chunk, ChunkDecodeError> {
    let mut cur = Cursor { data, pos: 0 };
    if cur.take(4).map_err(|_| ChunkDecodeError::InvalidMagic)? != MAGIC {
        return Err(ChunkDecodeError::InvalidMagic);
    }
    let version = cur.u8()?;
    if version != FORMAT_VERSION {
        return Err(ChunkDecodeError::UnsupportedVersion(version));
    }
    let cx = cur.i32()?;
    let cz = cur.i32()?;
    let size = cur.u16()? as usize;
    let min_y = cur.i16()? as i32;
    let height = cur.u16()? as usize;
    if size == 0 || size > MAX_CHUNK_SIZE || height == 0 {
        return Err(ChunkDecodeError::InvalidDimensions { size, height });
    }
    let palette_len = cur.u16()? as usize;
    let raw_palette = cur.take(palette_len * 4)?;
    let palette: Vec<Block> = raw_palette
        .chunks_exact(4)
        .map(|b| Block {
            id: u16::from_le_bytes([b[0], b[1]]),
            state: u16::from_le_bytes([b[2], b[3]]),
        })
        .collect();
    let width = cur.u8()?;
    if width != 8 && width != 16 {
        return Err(ChunkDecodeError::InvalidIndexWidth(width));
    }

    let cols = size * size;
    let volume = cols * height;
    let raw_indices = cur.take(volume * (width as usize / 8))?;
    let biomes = cur.take(cols)?;
    let light = cur.take(volume)?;
    if cur.pos != data.len() {
        return Err(ChunkDecodeError::TrailingBytes(data.len() - cur.pos));
    }

    let index_at = |i: usize| -> usize {
        if width == 8 {
            raw_indices[i] as usize
        } else {
            u16::from_le_bytes([raw_indices[i * 2], raw_indices[i * 2 + 1]]) as usize
        }
    };

    let mut columns = Vec::with_capacity(cols);
    for c in 0..cols {
        let mut blocks = Vec::with_capacity(height);
        for y in 0..height {
            let index = index_at(c * height + y);
            let b = palette
                .get(index)
                .copied()
                .ok_or(ChunkDecodeError::PaletteIndex {
                    index,
                    len: palette.len(),
                })?;
            blocks.push(b);
        }
        let col_light = light[c * height..(c + 1) * height].to_vec();
        columns.push(BlockColumn::new(biomes[c], blocks, col_light));
    }
    Ok(Chunk::new(
        ChunkCoord::new(cx, cz),
        size,
        min_y,
        height,
        columns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        Chunk::from_fn(ChunkCoord::new(3, -7), 4, -4, 12, |x, y, z| {
            if y < 0 {
                Block::new(1)
            } else if y == 0 && (x + z) % 2 == 0 {
                Block::with_state(5, 3)
            } else {
                Block::AIR
            }
        })
    }

    #[test]
    fn decode_restores_blocks_and_placement() {
        let chunk = sample();
        let bytes = encode_chunk(&chunk);
        assert_eq!(&bytes[..4], b"TSCK");
        let back = decode_chunk(&bytes).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn wide_palettes_use_sixteen_bit_indices() {
        let chunk = Chunk::from_fn(ChunkCoord::new(0, 0), 16, 0, 2, |x, y, z| {
            Block::new((1 + x + z * 16 + y as usize * 256) as u16)
        });
        let bytes = encode_chunk(&chunk);
        let back = decode_chunk(&bytes).unwrap();
        assert_eq!(back.block_local(15, 1, 15), Block::new(1 + 15 + 240 + 256));
    }

    #[test]
    fn bad_magic_and_version_are_reported() {
        let mut bytes = encode_chunk(&sample());
        bytes[4] = 9;
        assert_eq!(
            decode_chunk(&bytes),
            Err(ChunkDecodeError::UnsupportedVersion(9))
        );
        bytes[0] = b'X';
        assert_eq!(decode_chunk(&bytes), Err(ChunkDecodeError::InvalidMagic));
        assert_eq!(decode_chunk(&[]), Err(ChunkDecodeError::InvalidMagic));
    }

    #[test]
    fn out_of_range_palette_index_is_rejected() {
        let chunk = Chunk::from_fn(ChunkCoord::new(0, 0), 1, 0, 1, |_, _, _| Block::new(1));
        let mut bytes = encode_chunk(&chunk);
        // header(21) + one palette entry(4) + width(1) -> first index byte
        bytes[26] = 4;
        assert!(matches!(
            decode_chunk(&bytes),
            Err(ChunkDecodeError::PaletteIndex { index: 4, len: 1 })
        ));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = encode_chunk(&sample());
        bytes.push(0);
        assert_eq!(decode_chunk(&bytes), Err(ChunkDecodeError::TrailingBytes(1)));
    }
}
