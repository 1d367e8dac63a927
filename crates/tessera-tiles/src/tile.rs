use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tessera_mesh_cpu::MeshBatch;
use tessera_world::TileKey;

/// Which children of a coarse tile contributed, one bit per child slot
/// (row-major, at most `8 × 8`). Level-0 tiles use bit 0 for themselves.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coverage(pub u64);

impl Coverage {
    pub const SELF: Coverage = Coverage(1);

    #[inline]
    pub fn with(self, slot: usize) -> Coverage {
        Coverage(self.0 | (1u64 << slot))
    }

    #[inline]
    pub fn has(self, slot: usize) -> bool {
        slot < 64 && self.0 & (1u64 << slot) != 0
    }

    #[inline]
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// True when every one of `ratio²` children is present.
    pub fn is_full(self, ratio: u32) -> bool {
        let n = ratio * ratio;
        n > 0 && n <= 64 && self.count() == n && (self.0 >> n) == 0
    }
}

impl fmt::Debug for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coverage({:#x})", self.0)
    }
}

/// A rendered tile. `version` is the highest chunk stamp the render observed.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub key: TileKey,
    pub version: u64,
    pub rendered_at_ms: u64,
    pub incomplete: bool,
    pub coverage: Coverage,
    pub batch: MeshBatch,
}

impl Tile {
    pub fn approx_bytes(&self) -> usize {
        self.batch
            .parts
            .iter()
            .map(|p| {
                p.quads.len() * std::mem::size_of::<tessera_mesh_cpu::Quad>()
                    + (p.build.pos.len() + p.build.norm.len() + p.build.uv.len()) * 4
                    + p.build.idx.len() * 4
                    + p.build.col.len()
            })
            .sum::<usize>()
            + std::mem::size_of::<Tile>()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
