//! Coarse levels are built from finer batches only, through a top-surface
//! heightfield.

use std::collections::BTreeMap;

use tessera_blocks::{MaterialCatalog, MaterialId};
use tessera_world::Face;

use crate::greedy::merge_mask;
use crate::{MeshBatch, Quad, TileBounds};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeightColumn {
    pub height: i32,
    pub material: MaterialId,
}

impl HeightColumn {
    /// Higher surface wins; equal heights go to the lower material id.
    #[inline]
    fn beats(&self, other: &HeightColumn) -> bool {
        self.height > other.height
            || (self.height == other.height && self.material < other.material)
    }
}

/// Top surface sampled on a tile's cell grid. Empty cells have no surface.
#[derive(Clone, Debug)]
pub struct HeightField {
    pub bounds: TileBounds,
    cells: Vec<Option<HeightColumn>>,
}

impl HeightField {
    pub fn new(bounds: TileBounds) -> Self {
        let n = bounds.resolution as usize;
        Self {
            bounds,
            cells: vec![None; n * n],
        }
    }

    /// Heightfield of a batch at its own resolution.
    pub fn of_batch(batch: &MeshBatch) -> Self {
        let mut field = Self::new(batch.bounds);
        field.absorb(batch);
        field
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.bounds.resolution as usize
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<HeightColumn> {
        self.cells[j * self.dims() + i]
    }

    fn offer(&mut self, i: usize, j: usize, col: HeightColumn) {
        let n = self.dims();
        let slot = &mut self.cells[j * n + i];
        match slot {
            Some(cur) if !col.beats(cur) => {}
            _ => *slot = Some(col),
        }
    }

    /// Folds the upward faces of `batch` into this grid. Each cell keeps the
    /// best surface over the block span it covers, so a finer batch is
    /// aggregated `ratio × ratio` at a time.
    pub fn absorb(&mut self, batch: &MeshBatch) {
        let cell = self.bounds.cell() as i32;
        let n = self.dims() as i32;
        let [x0, z0] = self.bounds.origin;
        let span = |lo: i32, len: u32, origin: i32| {
            let a = (lo - origin).div_euclid(cell).max(0);
            let b = (lo + len as i32 - 1 - origin).div_euclid(cell).min(n - 1);
            a..=b
        };
        for q in batch.quads().filter(|q| q.face == Face::PosY) {
            let col = HeightColumn {
                height: q.origin[1],
                material: q.material,
            };
            for j in span(q.origin[2], q.size[1], z0) {
                for i in span(q.origin[0], q.size[0], x0) {
                    self.offer(i as usize, j as usize, col);
                }
            }
        }
    }

    /// Greedy top quads, walls where neighboring heights differ, and skirts
    /// down to `min_y` along the tile edge.
    pub fn to_quads(&self, min_y: i32) -> BTreeMap<MaterialId, Vec<Quad>> {
        let n = self.dims();
        let cell = self.bounds.cell();
        let [x0, z0] = self.bounds.origin;
        let mut quads: BTreeMap<MaterialId, Vec<Quad>> = BTreeMap::new();

        let mut mask = self.cells.clone();
        merge_mask(&mut mask, n, n, |_| true, |i, j, w, h, col| {
            quads.entry(col.material).or_default().push(Quad {
                face: Face::PosY,
                origin: [x0 + (i as u32 * cell) as i32, col.height, z0 + (j as u32 * cell) as i32],
                size: [w as u32 * cell, h as u32 * cell],
                material: col.material,
                boundary: false,
            });
        });

        // (lo, hi, material, boundary) per wall cell
        let mut row: Vec<Option<(i32, i32, MaterialId, bool)>> = vec![None; n];
        for face in [Face::PosX, Face::NegX, Face::PosZ, Face::NegZ] {
            let (dx, _, dz) = face.delta();
            let x_face = face.axis() == 0;
            for s in 0..n {
                for (t, slot) in row.iter_mut().enumerate() {
                    let (i, j) = if x_face { (s, t) } else { (t, s) };
                    *slot = self.get(i, j).and_then(|col| {
                        let ni = i as i64 + dx as i64;
                        let nj = j as i64 + dz as i64;
                        let inside = (0..n as i64).contains(&ni) && (0..n as i64).contains(&nj);
                        let lo = if inside {
                            self.get(ni as usize, nj as usize).map_or(min_y, |c| c.height)
                        } else {
                            min_y
                        };
                        (lo < col.height).then_some((lo, col.height, col.material, !inside))
                    });
                }
                let plane = (s as u32 + face.is_positive() as u32) * cell;
                merge_mask(&mut row, n, 1, |_| true, |t, _, w, _, (lo, hi, material, boundary)| {
                    let run = (t as u32 * cell) as i32;
                    let origin = if x_face {
                        [x0 + plane as i32, lo, z0 + run]
                    } else {
                        [x0 + run, lo, z0 + plane as i32]
                    };
                    quads.entry(material).or_default().push(Quad {
                        face,
                        origin,
                        size: [w as u32 * cell, (hi - lo) as u32],
                        material,
                        boundary,
                    });
                });
            }
        }
        quads
    }
}

/// Builds a level `L+1` batch over `bounds` from its level `L` children.
/// Children that do not fit `ratio` are ignored.
pub fn downsample(
    bounds: TileBounds,
    children: &[&MeshBatch],
    ratio: u32,
    materials: &MaterialCatalog,
) -> MeshBatch {
    let mut field = HeightField::new(bounds);
    let mut min_y: Option<i32> = None;
    let mut incomplete = false;
    for child in children {
        if child.bounds.edge * ratio != bounds.edge || child.bounds.level + 1 != bounds.level {
            log::warn!(
                "skipping child at {:?} (level {}, edge {}) for parent level {}",
                child.bounds.origin,
                child.bounds.level,
                child.bounds.edge,
                bounds.level
            );
            continue;
        }
        field.absorb(child);
        incomplete |= child.incomplete;
        min_y = Some(min_y.map_or(child.min_y, |m| m.min(child.min_y)));
    }
    let min_y = min_y.unwrap_or(0);
    MeshBatch::from_quads(bounds, min_y, incomplete, field.to_quads(min_y), materials)
}
