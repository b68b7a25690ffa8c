//! The aligned scene and its phase state machine.
//!
//! [`Scene`] is handed out by reference; outside this crate it can only be
//! read or changed through the scoped confidence mutators below. Pixels
//! rejected by post-processing are remembered per view and never reappear in
//! [`Scene::masks`], whatever the threshold.

use std::fmt;
use std::sync::Arc;

use fusion_core::{
    ConfTransform, FusionError, Iso3, Mask, PinholeIntrinsics, PointMap, Real,
    Result, RgbImage, ScalarMap,
};
use serde::{Deserialize, Serialize};

/// Lifecycle of a scene under the global aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ScenePhase {
    Uninitialized,
    Initialized,
    Optimizing { iteration: usize },
    Converged,
}

impl fmt::Display for ScenePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Optimizing { iteration } => write!(f, "optimizing, iteration {iteration}"),
            Self::Converged => write!(f, "converged"),
        }
    }
}

/// Per-image state of the scene.
#[derive(Debug, Clone)]
pub struct SceneView {
    pub name: String,
    pub image: Arc<RgbImage>,
    pub cam_to_world: Iso3,
    pub focal: Real,
    /// z-depth per pixel.
    pub depth: ScalarMap,
    /// Raw confidence per pixel.
    pub confidence: ScalarMap,
}

impl SceneView {
    pub fn intrinsics(&self) -> PinholeIntrinsics {
        PinholeIntrinsics::centered(self.focal, self.depth.width(), self.depth.height())
    }

    /// Points in the camera frame.
    pub fn camera_points(&self) -> PointMap {
        let k = self.intrinsics();
        let (w, h) = self.depth.shape();
        PointMap::from_fn(w, h, |x, y| {
            k.backproject(x as Real, y as Real, *self.depth.get(x, y))
        })
    }

    /// Points in the world frame.
    pub fn world_points(&self) -> PointMap {
        let pose = self.cam_to_world;
        self.camera_points().map(|p| pose.transform_point(p))
    }

    fn validate(&self, idx: usize) -> Result<()> {
        let ctx = |what: &str| format!("scene view {idx} ({}) {what}", self.name);
        self.image.ensure_same_shape(&self.depth, &ctx("depth"))?;
        self.image
            .ensure_same_shape(&self.confidence, &ctx("confidence"))?;
        if !(self.focal > 0.0 && self.focal.is_finite()) {
            return Err(FusionError::input(ctx(&format!("focal {}", self.focal))));
        }
        Ok(())
    }
}

/// Globally aligned cameras, depths and confidences.
#[derive(Debug, Clone)]
pub struct Scene {
    phase: ScenePhase,
    views: Vec<SceneView>,
    /// Pixels excluded by post-processing, one mask per view.
    suppressed: Vec<Mask>,
    conf_trf: ConfTransform,
}

impl Scene {
    /// An empty scene awaiting initialization.
    pub fn uninitialized(conf_trf: ConfTransform) -> Self {
        Self {
            phase: ScenePhase::Uninitialized,
            views: Vec::new(),
            suppressed: Vec::new(),
            conf_trf,
        }
    }

    /// Scene built from explicit views, in the [`ScenePhase::Initialized`] phase.
    pub fn from_views(views: Vec<SceneView>, conf_trf: ConfTransform) -> Result<Self> {
        if views.is_empty() {
            return Err(FusionError::input("scene needs at least one view"));
        }
        for (i, v) in views.iter().enumerate() {
            v.validate(i)?;
        }
        let suppressed = views
            .iter()
            .map(|v| {
                let (w, h) = v.confidence.shape();
                Mask::filled(w, h, false)
            })
            .collect();
        Ok(Self {
            phase: ScenePhase::Initialized,
            views,
            suppressed,
            conf_trf,
        })
    }

    pub fn phase(&self) -> ScenePhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: ScenePhase) {
        self.phase = phase;
    }

    pub fn is_converged(&self) -> bool {
        self.phase == ScenePhase::Converged
    }

    /// Fails with [`FusionError::ProvisionalScene`] unless optimization converged.
    pub fn ensure_exportable(&self) -> Result<()> {
        if !self.is_converged() {
            return Err(FusionError::ProvisionalScene {
                phase: self.phase.to_string(),
            });
        }
        Ok(())
    }

    pub fn conf_trf(&self) -> ConfTransform {
        self.conf_trf
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[SceneView] {
        &self.views
    }

    pub fn view(&self, idx: usize) -> Option<&SceneView> {
        self.views.get(idx)
    }

    pub(crate) fn views_mut(&mut self) -> &mut [SceneView] {
        &mut self.views
    }

    pub fn poses(&self) -> Vec<Iso3> {
        self.views.iter().map(|v| v.cam_to_world).collect()
    }

    pub fn focals(&self) -> Vec<Real> {
        self.views.iter().map(|v| v.focal).collect()
    }

    /// World-frame point map of every view.
    pub fn pts3d(&self) -> Vec<PointMap> {
        self.views.iter().map(SceneView::world_points).collect()
    }

    /// Copies of all confidence maps.
    pub fn confidence_snapshot(&self) -> Vec<ScalarMap> {
        self.views.iter().map(|v| v.confidence.clone()).collect()
    }

    /// Confidence threshold after the confidence transform.
    ///
    /// Raw confidences are compared against the transformed threshold.
    pub fn conf_threshold(&self, min_conf_thr: Real) -> Real {
        self.conf_trf.apply(min_conf_thr)
    }

    /// Usable-pixel masks: confidence above the transformed threshold and
    /// not suppressed by post-processing.
    pub fn masks(&self, min_conf_thr: Real) -> Vec<Mask> {
        let thr = self.conf_threshold(min_conf_thr);
        self.views
            .iter()
            .zip(&self.suppressed)
            .map(|(v, off)| {
                let (w, h) = v.confidence.shape();
                Mask::from_fn(w, h, |x, y| *v.confidence.get(x, y) > thr && !*off.get(x, y))
            })
            .collect()
    }

    /// Pixels of `view` excluded by post-processing.
    pub fn suppressed(&self, view: usize) -> Option<&Mask> {
        self.suppressed.get(view)
    }

    /// Clip confidence to `max_value` under `mask` and exclude those pixels
    /// from every later [`Scene::masks`] call.
    ///
    /// Returns how many confidences changed.
    pub fn suppress(&mut self, view: usize, mask: &Mask, max_value: Real) -> Result<usize> {
        let changed = self.clip_confidence(view, mask, max_value)?;
        if let Some(off) = self.suppressed.get_mut(view) {
            for (o, &m) in off.as_mut_slice().iter_mut().zip(mask.iter()) {
                *o |= m;
            }
        }
        Ok(changed)
    }

    /// Lower confidence to at most `max_value` wherever `mask` is set.
    ///
    /// Returns how many pixels changed.
    pub fn clip_confidence(&mut self, view: usize, mask: &Mask, max_value: Real) -> Result<usize> {
        let n = self.views.len();
        let v = self
            .views
            .get_mut(view)
            .ok_or_else(|| FusionError::input(format!("view {view} out of range for {n} views")))?;
        v.confidence.ensure_same_shape(mask, "confidence clip mask")?;
        let mut changed = 0;
        for (c, &m) in v.confidence.as_mut_slice().iter_mut().zip(mask.iter()) {
            if m && *c > max_value {
                *c = max_value;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::Grid;

    fn view(conf: Real) -> SceneView {
        SceneView {
            name: "v".into(),
            image: Arc::new(Grid::filled(4, 3, [0.2f32; 3])),
            cam_to_world: Iso3::identity(),
            focal: 4.0,
            depth: Grid::filled(4, 3, 2.0),
            confidence: Grid::filled(4, 3, conf),
        }
    }

    #[test]
    fn fresh_scene_is_not_exportable() {
        let scene = Scene::from_views(vec![view(2.0), view(5.0)], ConfTransform::Log).unwrap();
        assert_eq!(scene.phase(), ScenePhase::Initialized);
        let err = scene.ensure_exportable().unwrap_err();
        assert!(matches!(err, FusionError::ProvisionalScene { .. }));
    }

    #[test]
    fn masks_use_transformed_threshold() {
        let scene = Scene::from_views(vec![view(1.05), view(1.2)], ConfTransform::Log).unwrap();
        // ln(3) ≈ 1.0986
        let masks = scene.masks(3.0);
        assert_eq!(masks[0].count(), 0);
        assert_eq!(masks[1].count(), 12);
    }

    #[test]
    fn clip_confidence_only_touches_masked_pixels() {
        let mut scene = Scene::from_views(vec![view(5.0)], ConfTransform::Log).unwrap();
        let mask = Grid::from_fn(4, 3, |x, _| x == 0);
        assert_eq!(scene.clip_confidence(0, &mask, 0.0).unwrap(), 3);
        assert_eq!(scene.clip_confidence(0, &mask, 0.0).unwrap(), 0);
        assert_eq!(*scene.views()[0].confidence.get(0, 1), 0.0);
        assert_eq!(*scene.views()[0].confidence.get(1, 1), 5.0);
        assert!(scene.clip_confidence(3, &mask, 0.0).is_err());
    }

    #[test]
    fn suppressed_pixels_stay_out_of_masks_at_any_threshold() {
        let mut scene = Scene::from_views(vec![view(5.0)], ConfTransform::Log).unwrap();
        let top = Grid::from_fn(4, 3, |_, y| y == 0);
        assert_eq!(scene.suppress(0, &top, 0.0).unwrap(), 4);
        assert_eq!(scene.suppressed(0).unwrap().count(), 4);
        for thr in [3.0, 1.0, 0.5, 0.0] {
            assert_eq!(scene.masks(thr)[0].count(), 8, "threshold {thr}");
        }
    }

    #[test]
    fn plain_clip_does_not_suppress() {
        let mut scene = Scene::from_views(vec![view(5.0)], ConfTransform::Log).unwrap();
        let all = Grid::filled(4, 3, true);
        scene.clip_confidence(0, &all, 0.5).unwrap();
        assert_eq!(scene.suppressed(0).unwrap().count(), 0);
        assert_eq!(scene.masks(3.0)[0].count(), 0);
        assert_eq!(scene.masks(1.0)[0].count(), 12);
    }

    #[test]
    fn world_points_follow_pose() {
        let mut v = view(2.0);
        v.cam_to_world = Iso3::translation(1.0, 0.0, 0.0);
        let scene = Scene::from_views(vec![v], ConfTransform::Log).unwrap();
        let p = scene.pts3d()[0].get(2, 1).to_owned();
        // Pixel (2, 1) of a 4x3 image: principal point (2, 1.5).
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!((p.y + 0.25).abs() < 1e-12);
        assert!((p.z - 2.0).abs() < 1e-12);
    }
}
