use serde::{Deserialize, Serialize};
use tessera_world::Face;

type Vec3 = [f32; 3];

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshBuild {
    pub pos: Vec<f32>,
    pub norm: Vec<f32>,
    pub uv: Vec<f32>,
    pub idx: Vec<u32>,
    pub col: Vec<u8>,
}

impl MeshBuild {
    /// Pre-reserve capacity for approximately `n_quads` quads worth of data.
    #[inline]
    pub fn reserve_quads(&mut self, n_quads: usize) {
        // 4 vertices per quad
        self.pos.reserve(n_quads * 4 * 3);
        self.norm.reserve(n_quads * 4 * 3);
        self.uv.reserve(n_quads * 4 * 2);
        self.col.reserve(n_quads * 4 * 4);
        self.idx.reserve(n_quads * 6);
    }

    /// Appends a quad with explicit per-vertex UVs, fixing the winding so the
    /// front face points along `n`.
    pub fn add_quad_uv(
        &mut self,
        a: Vec3,
        b: Vec3,
        c: Vec3,
        d: Vec3,
        n: Vec3,
        mut uvs: [(f32, f32); 4],
        rgba: [u8; 4],
    ) {
        let base = self.pos.len() as u32 / 3;
        let mut vs = [a, d, c, b];
        let e1 = sub(vs[1], vs[0]);
        let e2 = sub(vs[2], vs[0]);
        let cross = [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ];
        if (cross[0] * n[0] + cross[1] * n[1] + cross[2] * n[2]) < 0.0 {
            vs.swap(1, 3);
            uvs.swap(1, 3);
        }
        // Flip V axis so textures aren't upside-down (top-left origin vs bottom-left)
        for uv in &mut uvs {
            uv.1 = -uv.1;
        }
        for i in 0..4 {
            self.pos.extend_from_slice(&vs[i]);
            self.norm.extend_from_slice(&n);
            self.uv.extend_from_slice(&[uvs[i].0, uvs[i].1]);
            self.col.extend_from_slice(&rgba);
        }
        self.idx
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Emits a face-aligned rectangle for `face`. `origin` is the rectangle's
    /// minimum corner on the face plane; `u1`/`v1` follow [`Face::plane_axes`].
    pub fn add_face_rect(&mut self, face: Face, origin: Vec3, u1: f32, v1: f32, rgba: [u8; 4]) {
        let n = face.normal();
        let [x, y, z] = origin;
        let (a, b, c, d) = match face {
            Face::PosY => ([x, y, z], [x + u1, y, z], [x + u1, y, z + v1], [x, y, z + v1]),
            Face::NegY => ([x, y, z + v1], [x + u1, y, z + v1], [x + u1, y, z], [x, y, z]),
            Face::PosX => ([x, y + v1, z + u1], [x, y + v1, z], [x, y, z], [x, y, z + u1]),
            Face::NegX => ([x, y + v1, z], [x, y + v1, z + u1], [x, y, z + u1], [x, y, z]),
            Face::PosZ => ([x + u1, y + v1, z], [x, y + v1, z], [x, y, z], [x + u1, y, z]),
            Face::NegZ => ([x, y + v1, z], [x + u1, y + v1, z], [x + u1, y, z], [x, y, z]),
        };
        // Derive absolute UVs from world-space coordinates per face orientation
        let uv_from = |p: Vec3| match face {
            Face::PosY | Face::NegY => (p[0], p[2]),
            Face::PosX | Face::NegX => (p[2], p[1]),
            Face::PosZ | Face::NegZ => (p[0], p[1]),
        };
        let uvs = [uv_from(a), uv_from(d), uv_from(c), uv_from(b)];
        self.add_quad_uv(a, b, c, d, n, uvs, rgba);
    }

    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.idx.len() / 3
    }

    /// Returns a slice of interleaved vertex positions (x,y,z per vertex).
    pub fn positions(&self) -> &[f32] {
        &self.pos
    }

    /// Returns a slice of interleaved vertex normals (x,y,z per vertex).
    pub fn normals(&self) -> &[f32] {
        &self.norm
    }
}

#[inline]
fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
