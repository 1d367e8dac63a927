//! CPU mesher: region snapshots to greedy-merged, per-material tile geometry.
#![forbid(unsafe_code)]

mod build;
mod greedy;
pub mod lod;
mod mesh_build;
mod snapshot;

pub use build::build_mesh;
pub use lod::{HeightColumn, HeightField, downsample};
pub use mesh_build::MeshBuild;
pub use snapshot::{Cell, ChunkSlot, NeighborSide, RegionSnapshot};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_blocks::{MaterialCatalog, MaterialId};
use tessera_world::{DetailLevel, Face, LodPolicy, TileKey, WorldLayout};

/// A merged face rectangle in world block units. `origin` lies on the face
/// plane at the rectangle's minimum corner; `size` runs along
/// [`Face::plane_axes`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub face: Face,
    pub origin: [i32; 3],
    pub size: [u32; 2],
    pub material: MaterialId,
    /// Faces against missing neighbor data (world edge, unloaded side, LOD skirt).
    pub boundary: bool,
}

impl Quad {
    pub fn area(&self) -> u64 {
        self.size[0] as u64 * self.size[1] as u64
    }
}

/// Block-space footprint of a tile and its cell grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileBounds {
    pub level: DetailLevel,
    pub origin: [i32; 2],
    pub edge: u32,
    /// Cells per side; every level keeps the level-0 resolution.
    pub resolution: u32,
}

impl TileBounds {
    pub fn of_key(key: TileKey, layout: &WorldLayout, lod: &LodPolicy) -> Self {
        let (x, z, edge) = key.block_bounds(layout, lod);
        Self {
            level: key.level,
            origin: [x as i32, z as i32],
            edge: edge as u32,
            resolution: layout.region_blocks() as u32,
        }
    }

    /// Edge length of one grid cell in blocks.
    #[inline]
    pub fn cell(&self) -> u32 {
        (self.edge / self.resolution.max(1)).max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshPart {
    pub material: MaterialId,
    pub quads: Vec<Quad>,
    pub build: MeshBuild,
}

/// Geometry of one tile, one part per material in ascending material order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshBatch {
    pub bounds: TileBounds,
    pub min_y: i32,
    pub incomplete: bool,
    pub parts: Vec<MeshPart>,
}

impl MeshBatch {
    pub fn empty(bounds: TileBounds) -> Self {
        Self {
            bounds,
            min_y: 0,
            incomplete: false,
            parts: Vec::new(),
        }
    }

    /// Triangulates grouped quads. Map order fixes part order.
    pub(crate) fn from_quads(
        bounds: TileBounds,
        min_y: i32,
        incomplete: bool,
        quads: BTreeMap<MaterialId, Vec<Quad>>,
        materials: &MaterialCatalog,
    ) -> Self {
        let parts = quads
            .into_iter()
            .map(|(material, quads)| {
                let rgba = materials.color(material);
                let mut build = MeshBuild::default();
                build.reserve_quads(quads.len());
                for q in &quads {
                    let origin = [q.origin[0] as f32, q.origin[1] as f32, q.origin[2] as f32];
                    build.add_face_rect(q.face, origin, q.size[0] as f32, q.size[1] as f32, rgba);
                }
                MeshPart {
                    material,
                    quads,
                    build,
                }
            })
            .collect();
        Self {
            bounds,
            min_y,
            incomplete,
            parts,
        }
    }

    #[inline]
    pub fn level(&self) -> DetailLevel {
        self.bounds.level
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.quads.is_empty())
    }

    pub fn quads(&self) -> impl Iterator<Item = &Quad> + '_ {
        self.parts.iter().flat_map(|p| p.quads.iter())
    }

    pub fn quad_count(&self) -> usize {
        self.parts.iter().map(|p| p.quads.len()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.parts.iter().map(|p| p.build.triangle_count()).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
