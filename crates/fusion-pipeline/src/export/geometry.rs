use fusion_core::{transform_point_h, Mask, Mat4, Real};
use fusion_optim::SceneView;

/// Merged scene geometry in the normalized export frame.
///
/// Point clouds leave `triangles` empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryBuffer {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl GeometryBuffer {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn flat_indices(&self) -> Vec<u32> {
        self.triangles.iter().flatten().copied().collect()
    }
}

fn to_f32(p: &fusion_core::Pt3) -> [f32; 3] {
    [p.x as f32, p.y as f32, p.z as f32]
}

/// Every masked-in point of every view, with its source colour.
pub(crate) fn point_cloud(views: &[SceneView], masks: &[Mask], transform: &Mat4) -> GeometryBuffer {
    let mut out = GeometryBuffer::default();
    for (view, mask) in views.iter().zip(masks) {
        let pts = view.world_points();
        for ((p, &m), rgb) in pts.iter().zip(mask.iter()).zip(view.image.iter()) {
            if m {
                out.positions.push(to_f32(&transform_point_h(transform, p)));
                out.colors.push(*rgb);
            }
        }
    }
    out
}

fn depth_ratio_ok(depths: [Real; 3], max_ratio: Option<Real>) -> bool {
    let Some(limit) = max_ratio else {
        return true;
    };
    let lo = depths.iter().copied().fold(Real::INFINITY, Real::min);
    let hi = depths.iter().copied().fold(Real::NEG_INFINITY, Real::max);
    lo > 0.0 && hi / lo <= limit
}

/// Triangulate each view's pixel grid and concatenate the per-view meshes.
///
/// Each 2×2 cell yields up to two triangles; a triangle is kept only when its
/// three pixels are masked in and their depth ratio stays within `max_ratio`.
/// Only pixels used by some triangle become vertices.
pub(crate) fn mesh(
    views: &[SceneView],
    masks: &[Mask],
    max_ratio: Option<Real>,
    transform: &Mat4,
) -> GeometryBuffer {
    let mut out = GeometryBuffer::default();
    for (view, mask) in views.iter().zip(masks) {
        let (w, h) = mask.shape();
        let depth = &view.depth;
        let mut faces: Vec<[usize; 3]> = Vec::new();
        for y in 0..h.saturating_sub(1) {
            for x in 0..w.saturating_sub(1) {
                let a = (x, y);
                let b = (x + 1, y);
                let c = (x, y + 1);
                let d = (x + 1, y + 1);
                for tri in [[a, b, c], [b, d, c]] {
                    let inside = tri.iter().all(|&(u, v)| *mask.get(u, v));
                    let depths = tri.map(|(u, v)| *depth.get(u, v));
                    if inside && depth_ratio_ok(depths, max_ratio) {
                        faces.push(tri.map(|(u, v)| mask.idx(u, v)));
                    }
                }
            }
        }
        if faces.is_empty() {
            continue;
        }

        let pts = view.world_points();
        let mut remap = vec![u32::MAX; w * h];
        for face in &faces {
            for &pix in face {
                if remap[pix] == u32::MAX {
                    remap[pix] = out.positions.len() as u32;
                    out.positions
                        .push(to_f32(&transform_point_h(transform, &pts.as_slice()[pix])));
                    out.colors.push(view.image.as_slice()[pix]);
                }
            }
        }
        out.triangles
            .extend(faces.iter().map(|f| f.map(|pix| remap[pix])));
    }
    out
}
