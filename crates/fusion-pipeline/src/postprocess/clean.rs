use fusion_core::{Mask, Real, Result, ScalarMap};
use fusion_optim::Scene;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters of the cross-view consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanOptions {
    /// Relative depth margin: a point must lie in front of another camera's
    /// surface by more than this fraction to count as inconsistent.
    pub tolerance: Real,
    /// Confidence assigned to inconsistent pixels.
    pub max_bad_conf: Real,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.001,
            max_bad_conf: 0.0,
        }
    }
}

/// Pixels of `view` that occlude another camera's more confident surface.
fn inconsistent_pixels(scene: &Scene, conf: &[ScalarMap], view: usize, tol: Real) -> Mask {
    let views = scene.views();
    let src = &views[view];
    let pts = src.world_points();
    let mut bad = Mask::filled(pts.width(), pts.height(), false);

    for (j, other) in views.iter().enumerate() {
        if j == view {
            continue;
        }
        let cam_from_world = other.cam_to_world.inverse();
        let k = other.intrinsics();
        let (w, h) = other.depth.shape();
        for (idx, p) in pts.iter().enumerate() {
            let proj = cam_from_world.transform_point(p);
            let Some(px) = k.project(&proj) else {
                continue;
            };
            let (u, v) = (px.x.round(), px.y.round());
            if !(u >= 0.0 && v >= 0.0 && u < w as Real && v < h as Real) {
                continue;
            }
            let (u, v) = (u as usize, v as usize);
            if proj.z < (1.0 - tol) * *other.depth.get(u, v)
                && conf[view].as_slice()[idx] < *conf[j].get(u, v)
            {
                bad.as_mut_slice()[idx] = true;
            }
        }
    }
    bad
}

/// Suppress pixels whose 3D point hides a more confident surface seen by another camera.
///
/// A point of image `i` projected into camera `j` is inconsistent when it lands
/// inside `j`'s image, lies in front of `j`'s depth by more than `tolerance`, and
/// `i` is less confident there than `j`. Such pixels get their confidence
/// clipped to `max_bad_conf`. All checks read a snapshot of the confidences
/// taken before any change, so running the pass twice changes nothing more.
///
/// Returns the number of pixels whose confidence was lowered.
pub fn clean_pointcloud(scene: &mut Scene, opts: &CleanOptions) -> Result<usize> {
    let snapshot = scene.confidence_snapshot();
    let masks: Vec<Mask> = (0..scene.len())
        .into_par_iter()
        .map(|i| inconsistent_pixels(scene, &snapshot, i, opts.tolerance))
        .collect();

    let mut total = 0;
    for (i, mask) in masks.iter().enumerate() {
        let n = scene.suppress(i, mask, opts.max_bad_conf)?;
        log::debug!("clean: view {i}: {n} of {} pixels suppressed", mask.count());
        total += n;
    }
    if total == 0 {
        log::warn!("clean_pointcloud left every confidence unchanged");
    } else {
        log::info!("clean_pointcloud suppressed {total} pixels");
    }
    Ok(total)
}
