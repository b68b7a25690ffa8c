use std::sync::Arc;

use fusion_core::{transform_point_h, Mat4, Real, RgbImage};
use fusion_optim::SceneView;

/// Frustum colours, cycled by image index.
pub const CAM_COLORS: [[u8; 3]; 11] = [
    [255, 0, 0],
    [0, 0, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 204, 0],
    [0, 204, 204],
    [128, 255, 255],
    [255, 128, 255],
    [255, 255, 128],
    [0, 0, 0],
    [128, 128, 128],
];

/// Apex-to-corner edges followed by the image-plane rectangle.
pub const FRUSTUM_LINES: [[u32; 2]; 8] = [
    [0, 1],
    [0, 2],
    [0, 3],
    [0, 4],
    [1, 2],
    [2, 3],
    [3, 4],
    [4, 1],
];

/// Wireframe pyramid marking one camera in the exported scene.
#[derive(Debug, Clone)]
pub struct CameraFrustum {
    pub index: usize,
    pub color: [u8; 3],
    /// Camera centre, normalized frame.
    pub apex: [f32; 3],
    /// Image-plane corners at pixels (0,0), (w,0), (w,h), (0,h).
    pub corners: [[f32; 3]; 4],
    /// Source image drawn on the image plane, if cameras are opaque.
    pub texture: Option<Arc<RgbImage>>,
}

impl CameraFrustum {
    /// Apex first, then the four corners.
    pub fn vertices(&self) -> [[f32; 3]; 5] {
        let [c0, c1, c2, c3] = self.corners;
        [self.apex, c0, c1, c2, c3]
    }

    pub fn color_f32(&self) -> [f32; 3] {
        self.color.map(|c| c as f32 / 255.0)
    }
}

pub(crate) fn camera_frustum(
    index: usize,
    view: &SceneView,
    transform: &Mat4,
    cam_size: Real,
    textured: bool,
) -> CameraFrustum {
    let pose = transform * view.cam_to_world.to_homogeneous();
    let k = view.intrinsics();
    let (w, h) = (view.depth.width() as Real, view.depth.height() as Real);
    let depth = cam_size * view.focal / w;
    let at = |x: Real, y: Real, d: Real| {
        let p = transform_point_h(&pose, &k.backproject(x, y, d));
        [p.x as f32, p.y as f32, p.z as f32]
    };
    CameraFrustum {
        index,
        color: CAM_COLORS[index % CAM_COLORS.len()],
        apex: at(k.cx, k.cy, 0.0),
        corners: [
            at(0.0, 0.0, depth),
            at(w, 0.0, depth),
            at(w, h, depth),
            at(0.0, h, depth),
        ],
        texture: textured.then(|| Arc::clone(&view.image)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::{Grid, Iso3};

    #[test]
    fn frustum_sits_in_front_of_the_camera() {
        let view = SceneView {
            name: "v".into(),
            image: Arc::new(Grid::filled(8, 6, [0.5f32; 3])),
            cam_to_world: Iso3::translation(1.0, 0.0, 0.0),
            focal: 8.0,
            depth: Grid::filled(8, 6, 2.0),
            confidence: Grid::filled(8, 6, 1.0),
        };
        let f = camera_frustum(12, &view, &Mat4::identity(), 0.5, false);
        assert_eq!(f.color, CAM_COLORS[1]);
        assert_eq!(f.apex, [1.0, 0.0, 0.0]);
        // depth = 0.5 * 8 / 8
        for c in f.corners {
            assert!((c[2] - 0.5).abs() < 1e-6);
        }
        assert!((f.corners[0][0] - 0.75).abs() < 1e-6);
        assert!(f.texture.is_none());
        assert!(camera_frustum(0, &view, &Mat4::identity(), 0.5, true)
            .texture
            .is_some());
    }
}
