//! Ray-cast synthetic scene: a textured backdrop plane and a sphere in front of it.

use nalgebra::{Rotation3, Translation3};

use super::noise::{unit_sample, UniformPointNoise};
use crate::{
    Grid, ImageSet, InputImage, Iso3, PairEdge, PairwiseEstimate, PinholeIntrinsics, PointMap,
    Pt3, Real, Result, RgbImage, ScalarMap, Vec3,
};

/// Ground-truth camera of a synthetic view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticView {
    pub cam_to_world: Iso3,
    pub focal: Real,
    pub width: usize,
    pub height: usize,
}

/// Small static scene with known cameras and geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    pub views: Vec<SyntheticView>,
    /// Backdrop plane `z = plane_z` in world coordinates.
    pub plane_z: Real,
    pub sphere_center: Pt3,
    pub sphere_radius: Real,
}

/// How pairwise predictions are derived from the ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateOptions {
    /// Seed for the per-pair scale.
    pub seed: u64,
    /// Each pair gets a scale uniformly drawn from this range.
    pub scale_range: (Real, Real),
    /// Raw confidence reported for every pixel.
    pub confidence: Real,
    pub noise: UniformPointNoise,
}

impl Default for EstimateOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            scale_range: (0.5, 2.0),
            confidence: 5.0,
            noise: UniformPointNoise::default(),
        }
    }
}

/// Result of casting one pixel ray.
#[derive(Debug, Clone, Copy)]
struct Hit {
    depth: Real,
    world: Pt3,
    on_sphere: bool,
}

impl SyntheticScene {
    /// `n_views` cameras on a short lateral arc, all looking towards the sphere.
    pub fn orbit(n_views: usize, width: usize, height: usize) -> Self {
        let mid = (n_views as Real - 1.0) / 2.0;
        let views = (0..n_views)
            .map(|k| {
                let off = k as Real - mid;
                let rot = Rotation3::from_euler_angles(0.02 * off, -0.06 * off, 0.01 * off);
                SyntheticView {
                    cam_to_world: Iso3::from_parts(
                        Translation3::new(0.25 * off, 0.03 * off, 0.0),
                        rot.into(),
                    ),
                    focal: 1.1 * width as Real,
                    width,
                    height,
                }
            })
            .collect();
        Self {
            views,
            plane_z: 4.0,
            sphere_center: Pt3::new(0.0, 0.0, 3.0),
            sphere_radius: 0.6,
        }
    }

    /// Same camera with a different image size; the field of view is kept.
    pub fn with_view_size(mut self, view: usize, width: usize, height: usize) -> Self {
        if let Some(v) = self.views.get_mut(view) {
            v.focal *= width as Real / v.width as Real;
            v.width = width;
            v.height = height;
        }
        self
    }

    pub fn size(&self, view: usize) -> (usize, usize) {
        (self.views[view].width, self.views[view].height)
    }

    pub fn intrinsics(&self, view: usize) -> PinholeIntrinsics {
        let v = &self.views[view];
        PinholeIntrinsics::centered(v.focal, v.width, v.height)
    }

    pub fn poses(&self) -> Vec<Iso3> {
        self.views.iter().map(|v| v.cam_to_world).collect()
    }

    fn cast(&self, view: usize, x: usize, y: usize) -> Hit {
        let k = self.intrinsics(view);
        let pose = &self.views[view].cam_to_world;
        let dir_cam = Vec3::new(
            (x as Real - k.cx) / k.focal,
            (y as Real - k.cy) / k.focal,
            1.0,
        );
        let origin = Pt3::from(pose.translation.vector);
        let dir = pose.rotation * dir_cam;

        // Camera-frame z of `origin + t * dir` equals `t` since dir_cam.z = 1.
        let mut best = Hit {
            depth: (self.plane_z - origin.z) / dir.z,
            world: Pt3::origin(),
            on_sphere: false,
        };
        let oc = origin - self.sphere_center;
        let a = dir.dot(&dir);
        let b = 2.0 * dir.dot(&oc);
        let c = oc.dot(&oc) - self.sphere_radius * self.sphere_radius;
        let disc = b * b - 4.0 * a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / (2.0 * a);
            if t > 0.0 && t < best.depth {
                best.depth = t;
                best.on_sphere = true;
            }
        }
        best.world = origin + dir * best.depth;
        best
    }

    /// Ground-truth z-depth of every pixel of `view`.
    pub fn depth_map(&self, view: usize) -> ScalarMap {
        let (w, h) = self.size(view);
        Grid::from_fn(w, h, |x, y| self.cast(view, x, y).depth)
    }

    /// Ground-truth points of `view` in its own camera frame.
    pub fn camera_points(&self, view: usize) -> PointMap {
        let k = self.intrinsics(view);
        let depth = self.depth_map(view);
        let (w, h) = self.size(view);
        Grid::from_fn(w, h, |x, y| {
            k.backproject(x as Real, y as Real, *depth.get(x, y))
        })
    }

    /// Ground-truth points of `view` in world coordinates.
    pub fn world_points(&self, view: usize) -> PointMap {
        let (w, h) = self.size(view);
        Grid::from_fn(w, h, |x, y| self.cast(view, x, y).world)
    }

    /// Rendered colors: checkerboard backdrop, shaded red sphere.
    pub fn render(&self, view: usize) -> RgbImage {
        let (w, h) = self.size(view);
        Grid::from_fn(w, h, |x, y| {
            let hit = self.cast(view, x, y);
            if hit.on_sphere {
                let n = (hit.world - self.sphere_center) / self.sphere_radius;
                let shade = (0.4 + 0.6 * (-n.z).max(0.0)) as f32;
                [0.85 * shade, 0.25 * shade, 0.2 * shade]
            } else {
                let cx = ((hit.world.x + 16.0) * 4.0).floor() as i64;
                let cy = ((hit.world.y + 16.0) * 4.0).floor() as i64;
                if (cx + cy) % 2 == 0 {
                    [0.85, 0.8, 0.7]
                } else {
                    [0.35, 0.3, 0.25]
                }
            }
        })
    }

    /// All rendered views as an input image set.
    pub fn image_set(&self) -> Result<ImageSet> {
        let images = (0..self.views.len())
            .map(|k| InputImage::new(k, format!("view_{k:02}.png"), self.render(k)))
            .collect();
        ImageSet::new(images)
    }

    /// Pairwise prediction for `edge`, expressed in camera `a` at a per-pair scale.
    pub fn estimate(&self, edge: PairEdge, opts: &EstimateOptions) -> PairwiseEstimate {
        let (lo, hi) = opts.scale_range;
        let scale = lo + (hi - lo) * unit_sample(opts.seed, edge.a, edge.b);
        let cam_a_from_cam_b_true =
            self.views[edge.a].cam_to_world.inverse() * self.views[edge.b].cam_to_world;
        let mut cam_a_from_cam_b = cam_a_from_cam_b_true;
        cam_a_from_cam_b.translation.vector *= scale;

        let stream = |side: usize| (edge.a << 20) ^ (edge.b << 1) ^ side;
        let pts_a = {
            let own = self.camera_points(edge.a);
            let mut idx = 0;
            own.map(|p| {
                let q = Pt3::from(p.coords * scale) + opts.noise.sample(stream(0), idx);
                idx += 1;
                q
            })
        };
        let pts_b = {
            let own = self.camera_points(edge.b);
            let mut idx = 0;
            own.map(|p| {
                let q = cam_a_from_cam_b.transform_point(&Pt3::from(p.coords * scale))
                    + opts.noise.sample(stream(1), idx);
                idx += 1;
                q
            })
        };

        PairwiseEstimate {
            edge,
            conf_a: Grid::filled(pts_a.width(), pts_a.height(), opts.confidence),
            conf_b: Grid::filled(pts_b.width(), pts_b.height(), opts.confidence),
            pts_a,
            pts_b,
            cam_a_from_cam_b,
        }
    }
}
