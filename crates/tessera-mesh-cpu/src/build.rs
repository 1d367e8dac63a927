use std::collections::BTreeMap;

use tessera_blocks::{BlockRegistry, FaceRole, MaterialId};
use tessera_world::Face;

use crate::greedy::merge_mask;
use crate::snapshot::{Cell, RegionSnapshot};
use crate::{MeshBatch, Quad, TileBounds};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FaceKey {
    material: MaterialId,
    boundary: bool,
    mergeable: bool,
}

#[inline]
fn role_of(face: Face) -> FaceRole {
    match face {
        Face::PosY => FaceRole::Top,
        Face::NegY => FaceRole::Bottom,
        _ => FaceRole::Side,
    }
}

/// Decides whether the `face` of the block at `p` is drawn, and how.
#[inline]
fn face_key(
    snapshot: &RegionSnapshot,
    registry: &BlockRegistry,
    p: [usize; 3],
    face: Face,
) -> Option<FaceKey> {
    let block = snapshot.block(p[0], p[1], p[2]);
    let rules = registry.class_of(block).rules();
    if !rules.visible {
        return None;
    }
    let (dx, dy, dz) = face.delta();
    let boundary = match snapshot.cell(p[0] as i32 + dx, p[1] as i32 + dy, p[2] as i32 + dz) {
        Cell::Unknown => true,
        Cell::Block(other) if registry.face_visible(block, other) => false,
        Cell::Block(_) => return None,
    };
    Some(FaceKey {
        material: registry.material_for(block, role_of(face)),
        boundary,
        mergeable: rules.mergeable,
    })
}

/// Level-0 mesh of a region snapshot.
pub fn build_mesh(snapshot: &RegionSnapshot, registry: &BlockRegistry) -> MeshBatch {
    let n = snapshot.edge;
    let dims = [n, snapshot.height, n];
    let base = [snapshot.origin.0, snapshot.min_y, snapshot.origin.1];
    let mut quads: BTreeMap<MaterialId, Vec<Quad>> = BTreeMap::new();

    for face in Face::ALL {
        let axis = face.axis();
        let (ua, va) = face.plane_axes();
        let (width, height) = (dims[ua], dims[va]);
        let mut mask: Vec<Option<FaceKey>> = vec![None; width * height];

        for s in 0..dims[axis] {
            for j in 0..height {
                for i in 0..width {
                    let mut p = [0usize; 3];
                    p[axis] = s;
                    p[ua] = i;
                    p[va] = j;
                    mask[j * width + i] = face_key(snapshot, registry, p, face);
                }
            }
            merge_mask(
                &mut mask,
                width,
                height,
                |k| k.mergeable,
                |i, j, w, h, key| {
                    let mut origin = base;
                    origin[axis] += s as i32 + face.is_positive() as i32;
                    origin[ua] += i as i32;
                    origin[va] += j as i32;
                    quads.entry(key.material).or_default().push(Quad {
                        face,
                        origin,
                        size: [w as u32, h as u32],
                        material: key.material,
                        boundary: key.boundary,
                    });
                },
            );
        }
    }

    let bounds = TileBounds {
        level: 0,
        origin: [snapshot.origin.0, snapshot.origin.1],
        edge: n as u32,
        resolution: n as u32,
    };
    let batch = MeshBatch::from_quads(
        bounds,
        snapshot.min_y,
        snapshot.is_incomplete(),
        quads,
        &registry.materials,
    );
    log::trace!(
        "meshed region {}: {} quads, {} triangles{}",
        snapshot.region,
        batch.quad_count(),
        batch.triangle_count(),
        if batch.incomplete { " (incomplete)" } else { "" }
    );
    batch
}
