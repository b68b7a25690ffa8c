//! Model export: merged geometry, camera frustums and the GLB file.
//!
//! All geometry is expressed in a normalized frame in which the first camera
//! sits at the origin, rotated into the viewer's axis convention.

mod cameras;
mod geometry;
pub mod glb;

pub use cameras::{CameraFrustum, CAM_COLORS, FRUSTUM_LINES};
pub use geometry::GeometryBuffer;
pub use glb::{GlbBuilder, GlbDocument};

use std::io::Cursor;
use std::path::Path;

use fusion_core::{ensure_same_len, FusionError, Iso3, Mask, Mat4, Real, Result};
use fusion_optim::Scene;
use serde::{Deserialize, Serialize};

use crate::store::to_rgb8;
use glb::primitive;
use gltf_json::mesh::{Mode, Semantic};

/// Name of the geometry mesh inside the GLB file.
pub const SCENE_MESH: &str = "scene";

/// Point cloud or per-view triangulated surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryMode {
    #[default]
    PointCloud,
    Mesh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Threshold on confidence, before the confidence transform.
    pub min_conf_thr: Real,
    pub mode: GeometryMode,
    /// Frustum size relative to the image width.
    pub cam_size: Real,
    /// Draw frustums as bare wireframes, without the source image.
    pub transparent_cams: bool,
    /// Mesh mode: drop triangles whose depth max/min exceeds this ratio.
    pub max_depth_ratio: Option<Real>,
    pub file_name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            min_conf_thr: 3.0,
            mode: GeometryMode::PointCloud,
            cam_size: 0.005,
            transparent_cams: false,
            max_depth_ratio: None,
            file_name: "scene.glb".into(),
        }
    }
}

/// The exported artifact, ready to serialize.
#[derive(Debug, Clone)]
pub struct ExportedModel {
    pub mode: GeometryMode,
    pub geometry: GeometryBuffer,
    pub cameras: Vec<CameraFrustum>,
    /// World → normalized frame.
    pub normalization: Mat4,
    /// Camera-to-normalized-frame pose of every view.
    pub camera_poses: Vec<Mat4>,
}

impl ExportedModel {
    pub fn point_count(&self) -> usize {
        self.geometry.vertex_count()
    }

    pub fn face_count(&self) -> usize {
        self.geometry.face_count()
    }

    /// Encode into a GLB builder.
    pub fn to_glb(&self) -> std::io::Result<GlbBuilder> {
        let mut b = GlbBuilder::new();

        if self.geometry.is_empty() {
            log::warn!("exported geometry is empty; only cameras are written");
        } else {
            let pos = b.push_positions(&self.geometry.positions);
            let col = b.push_colors(&self.geometry.colors);
            let (indices, mode) = match self.mode {
                GeometryMode::PointCloud => (None, Mode::Points),
                GeometryMode::Mesh => (
                    Some(b.push_indices(&self.geometry.flat_indices())),
                    Mode::Triangles,
                ),
            };
            b.add_mesh(
                SCENE_MESH,
                vec![primitive(
                    mode,
                    &[(Semantic::Positions, pos), (Semantic::Colors(0), col)],
                    indices,
                    None,
                )],
            );
        }

        let line_indices: Vec<u32> = FRUSTUM_LINES.iter().flatten().copied().collect();
        for cam in &self.cameras {
            let verts = cam.vertices();
            let pos = b.push_positions(&verts);
            let col = b.push_colors(&[cam.color_f32(); 5]);
            let idx = b.push_indices(&line_indices);
            let mut primitives = vec![primitive(
                Mode::Lines,
                &[(Semantic::Positions, pos), (Semantic::Colors(0), col)],
                Some(idx),
                None,
            )];

            if let Some(texture) = &cam.texture {
                let mut png = Vec::new();
                to_rgb8(texture)
                    .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                let material = b.push_png_material(&png, &format!("camera_{}_image", cam.index));
                let pos = b.push_positions(&cam.corners);
                let uv = b.push_texcoords(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
                let idx = b.push_indices(&[0, 1, 2, 0, 2, 3]);
                primitives.push(primitive(
                    Mode::Triangles,
                    &[(Semantic::Positions, pos), (Semantic::TexCoords(0), uv)],
                    Some(idx),
                    Some(material),
                ));
            }
            b.add_mesh(&format!("camera_{}", cam.index), primitives);
        }
        Ok(b)
    }
}

/// World → export frame: `(cam2world[0] · OPENGL · Ry(180°))⁻¹`.
///
/// `OPENGL = diag(1, -1, -1, 1)` flips to the viewer's handedness; combined
/// with the half turn about y it is `diag(-1, -1, 1, 1)`, a proper rotation.
pub fn scene_normalization(first_cam_to_world: &Iso3) -> Mat4 {
    let opengl = Mat4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0));
    let rot_y_180 = Mat4::from_diagonal(&nalgebra::Vector4::new(-1.0, 1.0, -1.0, 1.0));
    let flip = opengl * rot_y_180;
    // flip is its own inverse
    flip * first_cam_to_world.inverse().to_homogeneous()
}

/// Build the exported model from a converged scene and per-view masks.
pub fn export_model(scene: &Scene, masks: &[Mask], opts: &ExportOptions) -> Result<ExportedModel> {
    scene.ensure_exportable()?;
    ensure_same_len("export masks", scene.len(), masks.len())?;
    for (i, (view, mask)) in scene.views().iter().zip(masks).enumerate() {
        view.depth
            .ensure_same_shape(mask, &format!("export mask of view {i}"))?;
    }
    let first = scene
        .view(0)
        .ok_or_else(|| FusionError::input("cannot export an empty scene"))?;
    let normalization = scene_normalization(&first.cam_to_world);

    let geometry = match opts.mode {
        GeometryMode::PointCloud => geometry::point_cloud(scene.views(), masks, &normalization),
        GeometryMode::Mesh => {
            geometry::mesh(scene.views(), masks, opts.max_depth_ratio, &normalization)
        }
    };
    let cameras = scene
        .views()
        .iter()
        .enumerate()
        .map(|(i, v)| {
            cameras::camera_frustum(i, v, &normalization, opts.cam_size, !opts.transparent_cams)
        })
        .collect();
    let camera_poses = scene
        .views()
        .iter()
        .map(|v| normalization * v.cam_to_world.to_homogeneous())
        .collect();

    log::info!(
        "exported {:?}: {} vertices, {} faces, {} cameras",
        opts.mode,
        geometry.vertex_count(),
        geometry.face_count(),
        scene.len()
    );
    Ok(ExportedModel {
        mode: opts.mode,
        geometry,
        cameras,
        normalization,
        camera_poses,
    })
}

/// [`export_model`] with masks derived from the scene at `opts.min_conf_thr`.
pub fn export_scene(scene: &Scene, opts: &ExportOptions) -> Result<ExportedModel> {
    let masks = scene.masks(opts.min_conf_thr);
    export_model(scene, &masks, opts)
}

/// Serialize a model to a GLB file at `path`.
pub fn write_model(model: &ExportedModel, path: &Path) -> Result<()> {
    let builder = model.to_glb().map_err(|e| FusionError::Serialization {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    glb::write_glb(builder, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::synthetic::{EstimateOptions, SyntheticScene};
    use fusion_core::{build_pair_graph, ConfTransform, GraphParams, Grid};
    use fusion_optim::{AlignOptions, GlobalAligner, OptimizeOptions};

    /// Two 6x4 views, aligned for a few iterations; the right half of each
    /// image is below the default threshold.
    fn converged_scene() -> Scene {
        let truth = SyntheticScene::orbit(2, 6, 4);
        let graph = build_pair_graph(2, &GraphParams::default()).unwrap();
        let estimates = graph
            .edges
            .iter()
            .map(|e| truth.estimate(*e, &EstimateOptions::default()))
            .collect();
        let mut aligner = GlobalAligner::new(graph, estimates, AlignOptions::default()).unwrap();
        aligner.initialize(&truth.image_set().unwrap()).unwrap();
        aligner
            .optimize(&OptimizeOptions {
                niter: 3,
                ..OptimizeOptions::default()
            })
            .unwrap();
        let mut scene = aligner.into_scene();
        let low = Grid::from_fn(6, 4, |x, _| x >= 3);
        for i in 0..2 {
            scene.clip_confidence(i, &low, 0.5).unwrap();
        }
        scene
    }

    #[test]
    fn first_camera_lands_on_the_reference_pose() {
        let scene = converged_scene();
        let model = export_scene(&scene, &ExportOptions::default()).unwrap();
        let expected = Mat4::from_diagonal(&nalgebra::Vector4::new(-1.0, -1.0, 1.0, 1.0));
        assert!((model.camera_poses[0] - expected).norm() < 1e-12);
    }

    #[test]
    fn provisional_scene_is_refused() {
        let views = converged_scene().views().to_vec();
        let scene = Scene::from_views(views, ConfTransform::Log).unwrap();
        let err = export_scene(&scene, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, FusionError::ProvisionalScene { .. }));
    }

    #[test]
    fn glb_point_count_matches_mask() -> anyhow::Result<()> {
        let scene = converged_scene();
        let opts = ExportOptions::default();
        let masked: usize = scene.masks(opts.min_conf_thr).iter().map(Mask::count).sum();
        assert_eq!(masked, 24);

        let model = export_scene(&scene, &opts)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scene.glb");
        write_model(&model, &path)?;

        let doc = GlbDocument::read(&path)?;
        assert_eq!(doc.positions(SCENE_MESH)?.len(), masked);
        assert!(doc.mesh("camera_0").is_some());
        assert!(doc.mesh("camera_1").is_some());
        assert_eq!(doc.root.images.len(), 2);
        Ok(())
    }

    #[test]
    fn transparent_mesh_export() -> anyhow::Result<()> {
        let scene = converged_scene();
        let opts = ExportOptions {
            mode: GeometryMode::Mesh,
            transparent_cams: true,
            ..ExportOptions::default()
        };
        let model = export_scene(&scene, &opts)?;
        // masked columns 0..3 of a 6x4 grid: 2x3 cells, 2 triangles each, per view
        assert_eq!(model.face_count(), 24);
        let doc = GlbDocument::parse(&model.to_glb()?.finish()?)?;
        assert_eq!(doc.triangle_count(SCENE_MESH), 24);
        assert!(doc.root.images.is_empty());
        Ok(())
    }

    #[test]
    fn mask_count_mismatch_is_an_input_error() {
        let scene = converged_scene();
        let err = export_model(&scene, &scene.masks(3.0)[..1], &ExportOptions::default())
            .unwrap_err();
        assert!(matches!(err, FusionError::Input(_)));
    }
}
