//! Debug images: colorized depth and confidence maps.
//!
//! Depth and confidence are each normalized by one global maximum over all
//! views, so colours are comparable across images.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fusion_core::{FusionError, Real, Result, RgbImage, ScalarMap};
use fusion_optim::Scene;
use serde::{Deserialize, Serialize};

use crate::store::to_rgb8;

/// Scalar-to-colour ramps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    Viridis,
    Jet,
    Gray,
}

const VIRIDIS: [(f32, [f32; 3]); 5] = [
    (0.0, [68.0, 1.0, 84.0]),
    (0.25, [59.0, 82.0, 139.0]),
    (0.5, [33.0, 145.0, 140.0]),
    (0.75, [94.0, 201.0, 98.0]),
    (1.0, [253.0, 231.0, 37.0]),
];

impl Colormap {
    /// Colour of `t`, clamped to `[0, 1]`; non-finite values map to 0.
    pub fn color(&self, t: Real) -> [f32; 3] {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) as f32 } else { 0.0 };
        match self {
            Self::Gray => [t, t, t],
            Self::Jet => {
                let ch = |c: f32| (1.5 - (4.0 * t - c).abs()).clamp(0.0, 1.0);
                [ch(3.0), ch(2.0), ch(1.0)]
            }
            Self::Viridis => {
                let k = VIRIDIS
                    .windows(2)
                    .position(|w| t <= w[1].0)
                    .unwrap_or(VIRIDIS.len() - 2);
                let (t0, c0) = VIRIDIS[k];
                let (t1, c1) = VIRIDIS[k + 1];
                let s = (t - t0) / (t1 - t0);
                [0, 1, 2].map(|i| (c0[i] + s * (c1[i] - c0[i])) / 255.0)
            }
        }
    }

    pub fn apply(&self, normalized: &ScalarMap) -> RgbImage {
        normalized.map(|&t| self.color(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizeOptions {
    /// Write debug images next to the exported model.
    pub enabled: bool,
    pub depth_colormap: Colormap,
    pub conf_colormap: Colormap,
}

impl Default for VisualizeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            depth_colormap: Colormap::Viridis,
            conf_colormap: Colormap::Viridis,
        }
    }
}

/// Divide every map by the largest finite value over all of them.
///
/// The result lies in `[0, 1]` and its maximum is 1 unless every value is
/// non-positive, in which case all maps become zero.
pub fn normalize_global(maps: &[ScalarMap]) -> Vec<ScalarMap> {
    let max = maps
        .iter()
        .filter_map(ScalarMap::max_finite)
        .fold(Real::NEG_INFINITY, Real::max);
    maps.iter()
        .map(|m| {
            m.map(|&v| {
                if max > 0.0 && v.is_finite() {
                    (v / max).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
        })
        .collect()
}

/// Source image plus its colorized depth and confidence.
#[derive(Debug, Clone)]
pub struct DebugView {
    pub image: Arc<RgbImage>,
    pub depth: RgbImage,
    pub confidence: RgbImage,
}

pub fn render_debug_views(scene: &Scene, opts: &VisualizeOptions) -> Vec<DebugView> {
    let depths: Vec<ScalarMap> = scene.views().iter().map(|v| v.depth.clone()).collect();
    let depths = normalize_global(&depths);
    let confs = normalize_global(&scene.confidence_snapshot());
    scene
        .views()
        .iter()
        .zip(depths.iter().zip(&confs))
        .map(|(v, (d, c))| DebugView {
            image: Arc::clone(&v.image),
            depth: opts.depth_colormap.apply(d),
            confidence: opts.conf_colormap.apply(c),
        })
        .collect()
}

/// Write `img_{3i}.png` (image), `img_{3i+1}.png` (depth) and
/// `img_{3i+2}.png` (confidence) for every view into `outdir`.
pub fn save_debug_views(views: &[DebugView], outdir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(3 * views.len());
    for (i, view) in views.iter().enumerate() {
        for (k, img) in [view.image.as_ref(), &view.depth, &view.confidence]
            .into_iter()
            .enumerate()
        {
            let path = outdir.join(format!("img_{}.png", 3 * i + k));
            to_rgb8(img)
                .save(&path)
                .map_err(|e| FusionError::Serialization {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            paths.push(path);
        }
    }
    log::info!("wrote {} debug images to {}", paths.len(), outdir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::Grid;

    #[test]
    fn global_normalization_shares_one_scale() {
        let maps = vec![Grid::filled(2, 2, 1.0), Grid::from_vec(2, 2, vec![0.0, 2.0, 4.0, Real::NAN]).unwrap()];
        let n = normalize_global(&maps);
        assert!(n[0].iter().all(|&v| v == 0.25));
        assert_eq!(n[1].as_slice(), &[0.0, 0.5, 1.0, 0.0]);
        let top = n.iter().filter_map(ScalarMap::max_finite).fold(0.0, Real::max);
        assert_eq!(top, 1.0);
    }

    #[test]
    fn all_zero_maps_stay_zero() {
        let n = normalize_global(&[Grid::filled(3, 1, 0.0)]);
        assert!(n[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn colormap_endpoints() {
        let lo = Colormap::Viridis.color(0.0);
        let hi = Colormap::Viridis.color(1.0);
        assert!((lo[0] - 68.0 / 255.0).abs() < 1e-6);
        assert!((hi[1] - 231.0 / 255.0).abs() < 1e-6);
        assert_eq!(Colormap::Gray.color(2.0), [1.0, 1.0, 1.0]);
        assert_eq!(Colormap::Jet.color(0.0), [0.0, 0.0, 0.5]);
        assert_eq!(Colormap::Jet.color(1.0), [0.5, 0.0, 0.0]);
    }

    #[test]
    fn debug_images_follow_the_naming_scheme() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let view = DebugView {
            image: Arc::new(Grid::filled(4, 3, [0.5f32; 3])),
            depth: Grid::filled(4, 3, [0.1f32; 3]),
            confidence: Grid::filled(4, 3, [0.9f32; 3]),
        };
        let paths = save_debug_views(&[view.clone(), view], dir.path())?;
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["img_0.png", "img_1.png", "img_2.png", "img_3.png", "img_4.png", "img_5.png"]);
        assert!(paths.iter().all(|p| p.exists()));
        Ok(())
    }
}
