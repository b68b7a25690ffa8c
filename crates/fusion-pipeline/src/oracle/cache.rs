//! Offline prediction cache.
//!
//! Pairwise predictions produced by an external network are stored as one
//! JSON document keyed by image index and file name. The CLI's weights location points
//! at such a document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fusion_core::{
    FusionError, Grid, ImageSet, Iso3, PairEdge, PairwiseEstimate, PointMap, Pt3, Real, Result,
    ScalarMap,
};
use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use super::PairwiseOracle;

/// Rigid transform as quaternion `[x, y, z, w]` plus translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedPose {
    pub rotation_xyzw: [Real; 4],
    pub translation: [Real; 3],
}

impl CachedPose {
    pub fn from_iso(iso: &Iso3) -> Self {
        let q = iso.rotation.quaternion();
        let t = iso.translation.vector;
        Self {
            rotation_xyzw: [q.i, q.j, q.k, q.w],
            translation: [t.x, t.y, t.z],
        }
    }

    pub fn to_iso(&self) -> Iso3 {
        let [x, y, z, w] = self.rotation_xyzw;
        let [tx, ty, tz] = self.translation;
        Iso3::from_parts(
            Translation3::new(tx, ty, tz),
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
        )
    }
}

/// Image reference used as a cache key: position in the input set plus file
/// name, so a doubled image or two files sharing a name stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    pub index: usize,
    pub name: String,
}

impl ImageKey {
    fn of(images: &ImageSet, index: usize) -> Result<Self> {
        images
            .get(index)
            .map(|img| Self {
                index,
                name: img.name.clone(),
            })
            .ok_or_else(|| FusionError::input(format!("pair references missing image {index}")))
    }
}

/// Dense maps of one side of a pair, row-major at that image's own size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSide {
    pub image: ImageKey,
    pub width: usize,
    pub height: usize,
    pub pts: Vec<[Real; 3]>,
    pub conf: Vec<Real>,
}

impl CachedSide {
    fn new(image: ImageKey, pts: &PointMap, conf: &ScalarMap) -> Self {
        Self {
            image,
            width: pts.width(),
            height: pts.height(),
            pts: pts.iter().map(|p| [p.x, p.y, p.z]).collect(),
            conf: conf.as_slice().to_vec(),
        }
    }

    fn maps(&self) -> Result<(PointMap, ScalarMap)> {
        let (w, h) = (self.width, self.height);
        let ctx = |what: &str, len: usize| {
            FusionError::input(format!(
                "cached {what} of image {} ({}) has {len} values, expected {w}x{h}",
                self.image.index, self.image.name
            ))
        };
        if self.pts.len() != w * h {
            return Err(ctx("points", self.pts.len()));
        }
        if self.conf.len() != w * h {
            return Err(ctx("confidences", self.conf.len()));
        }
        let pts = Grid::from_vec(w, h, self.pts.iter().map(|p| Pt3::new(p[0], p[1], p[2])).collect())?;
        let conf = Grid::from_vec(w, h, self.conf.clone())?;
        Ok((pts, conf))
    }
}

/// One directed pair prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPrediction {
    pub a: CachedSide,
    pub b: CachedSide,
    pub cam_a_from_cam_b: CachedPose,
}

impl CachedPrediction {
    fn key(&self) -> (ImageKey, ImageKey) {
        (self.a.image.clone(), self.b.image.clone())
    }

    fn to_estimate(&self, edge: PairEdge) -> Result<PairwiseEstimate> {
        let (pts_a, conf_a) = self.a.maps()?;
        let (pts_b, conf_b) = self.b.maps()?;
        Ok(PairwiseEstimate {
            edge,
            pts_a,
            conf_a,
            pts_b,
            conf_b,
            cam_a_from_cam_b: self.cam_a_from_cam_b.to_iso(),
        })
    }
}

/// JSON document holding every cached pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionCache {
    /// Free-form model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// Device the predictions were computed on.
    #[serde(default)]
    pub device: Option<String>,
    pub pairs: Vec<CachedPrediction>,
}

impl PredictionCache {
    /// Record estimates under the index and name of their images.
    pub fn from_estimates(images: &ImageSet, estimates: &[PairwiseEstimate]) -> Result<Self> {
        let pairs = estimates
            .iter()
            .map(|est| {
                est.validate(images)?;
                Ok(CachedPrediction {
                    a: CachedSide::new(ImageKey::of(images, est.edge.a)?, &est.pts_a, &est.conf_a),
                    b: CachedSide::new(ImageKey::of(images, est.edge.b)?, &est.pts_b, &est.conf_b),
                    cam_a_from_cam_b: CachedPose::from_iso(&est.cam_a_from_cam_b),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            model: None,
            device: None,
            pairs,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FusionError::input(format!("cannot read prediction cache {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            FusionError::input(format!("malformed prediction cache {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let err = |message: String| FusionError::Serialization {
            path: path.to_path_buf(),
            message,
        };
        let text = serde_json::to_string(self).map_err(|e| err(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| err(e.to_string()))
    }
}

/// Oracle serving predictions from a [`PredictionCache`] file.
///
/// A pair missing in one direction is served by reversing the opposite one.
#[derive(Debug, Clone)]
pub struct PredictionCacheOracle {
    path: PathBuf,
    device: String,
    cache: PredictionCache,
    index: HashMap<(ImageKey, ImageKey), usize>,
}

impl PredictionCacheOracle {
    pub fn open(path: &Path, device: &str) -> Result<Self> {
        if !path.is_file() {
            return Err(FusionError::input(format!(
                "model weights / prediction cache not found: {}",
                path.display()
            )));
        }
        let cache = PredictionCache::load(path)?;
        if let Some(cached_device) = &cache.device {
            if cached_device != device {
                log::warn!(
                    "prediction cache was computed on '{cached_device}', requested device is '{device}'"
                );
            }
        }
        let mut index = HashMap::with_capacity(cache.pairs.len());
        for (i, p) in cache.pairs.iter().enumerate() {
            if index.insert(p.key(), i).is_some() {
                return Err(FusionError::input(format!(
                    "prediction cache {} lists pair ({}, {}) twice",
                    path.display(),
                    p.a.image.name,
                    p.b.image.name
                )));
            }
        }
        log::info!(
            "prediction cache {} ({} pairs, device {device})",
            path.display(),
            cache.pairs.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            device: device.to_string(),
            cache,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl PairwiseOracle for PredictionCacheOracle {
    fn name(&self) -> &str {
        "prediction-cache"
    }

    fn infer(&mut self, images: &ImageSet, pairs: &[PairEdge]) -> Result<Vec<PairwiseEstimate>> {
        pairs
            .iter()
            .map(|edge| {
                let (ka, kb) = (ImageKey::of(images, edge.a)?, ImageKey::of(images, edge.b)?);
                if let Some(&i) = self.index.get(&(ka.clone(), kb.clone())) {
                    return self.cache.pairs[i].to_estimate(*edge);
                }
                if let Some(&i) = self.index.get(&(kb.clone(), ka.clone())) {
                    let mut est = self.cache.pairs[i]
                        .to_estimate(PairEdge::new(edge.b, edge.a))?
                        .reversed();
                    est.edge = *edge;
                    return Ok(est);
                }
                Err(FusionError::input(format!(
                    "no cached prediction for pair {}:{} / {}:{} in {}",
                    ka.index,
                    ka.name,
                    kb.index,
                    kb.name,
                    self.path.display()
                )))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{run_inference, SyntheticOracle};
    use fusion_core::synthetic::{EstimateOptions, SyntheticScene};
    use fusion_core::{build_pair_graph, GraphParams};

    #[test]
    fn cache_round_trip_serves_both_directions() -> anyhow::Result<()> {
        let scene = SyntheticScene::orbit(3, 10, 8);
        let images = scene.image_set()?;
        let forward = build_pair_graph(
            3,
            &GraphParams {
                symmetrize: false,
                ..GraphParams::default()
            },
        )?;
        let mut synthetic = SyntheticOracle::new(scene, EstimateOptions::default());
        let estimates = run_inference(&mut synthetic, &images, &forward, 2)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("predictions.json");
        let mut cache = PredictionCache::from_estimates(&images, &estimates)?;
        cache.device = Some("cpu".into());
        cache.save(&path)?;

        let mut oracle = PredictionCacheOracle::open(&path, "cuda")?;
        let full = build_pair_graph(3, &GraphParams::default())?;
        let served = run_inference(&mut oracle, &images, &full, 4)?;
        assert_eq!(served.len(), 6);
        for (i, est) in estimates.iter().enumerate() {
            let p = served[i].pts_a.get(3, 2);
            assert!((p - est.pts_a.get(3, 2)).norm() < 1e-9);
        }
        // Reversed pairs describe the same camera relation.
        let rev = &served[3];
        assert_eq!(rev.edge.key(), (1, 0));
        let back = rev.cam_a_from_cam_b * estimates[0].cam_a_from_cam_b;
        assert!(back.translation.vector.norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn missing_cache_file_is_an_input_error() {
        let err = PredictionCacheOracle::open(Path::new("/nonexistent/weights.json"), "cpu")
            .unwrap_err();
        assert!(matches!(err, FusionError::Input(_)));
    }

    fn assert_same_estimates(served: &[PairwiseEstimate], expected: &[PairwiseEstimate]) {
        assert_eq!(served.len(), expected.len());
        for (s, e) in served.iter().zip(expected) {
            assert_eq!(s.edge.key(), e.edge.key());
            assert_eq!(s.pts_a.shape(), e.pts_a.shape());
            assert_eq!(s.pts_b.shape(), e.pts_b.shape());
            for (p, q) in s.pts_a.iter().chain(s.pts_b.iter()).zip(e.pts_a.iter().chain(e.pts_b.iter())) {
                assert!((p - q).norm() < 1e-9);
            }
            for (c, d) in s.conf_a.iter().chain(s.conf_b.iter()).zip(e.conf_a.iter().chain(e.conf_b.iter())) {
                assert!((c - d).abs() < 1e-9);
            }
            let rel = s.cam_a_from_cam_b.inverse() * e.cam_a_from_cam_b;
            assert!(rel.translation.vector.norm() < 1e-9 && rel.rotation.angle() < 1e-9);
        }
    }

    fn cache_then_serve(
        scene: SyntheticScene,
        images: &ImageSet,
        graph: &fusion_core::PairGraph,
    ) -> anyhow::Result<(Vec<PairwiseEstimate>, Vec<PairwiseEstimate>)> {
        let mut synthetic = SyntheticOracle::new(scene, EstimateOptions::default());
        let estimates = run_inference(&mut synthetic, images, graph, 1)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("predictions.json");
        PredictionCache::from_estimates(images, &estimates)?.save(&path)?;
        let mut oracle = PredictionCacheOracle::open(&path, "cpu")?;
        let served = run_inference(&mut oracle, images, graph, 2)?;
        Ok((estimates, served))
    }

    #[test]
    fn pairs_of_different_image_sizes_come_back_intact() -> anyhow::Result<()> {
        let scene = SyntheticScene::orbit(2, 4, 3).with_view_size(1, 6, 4);
        let images = scene.image_set()?;
        let graph = build_pair_graph(2, &GraphParams::default())?;
        let (estimates, served) = cache_then_serve(scene, &images, &graph)?;
        assert_eq!(served.len(), 2);
        assert_eq!(served[0].pts_a.shape(), (4, 3));
        assert_eq!(served[0].pts_b.shape(), (6, 4));
        assert_eq!(served[1].conf_a.shape(), (6, 4));
        assert_same_estimates(&served, &estimates);
        Ok(())
    }

    #[test]
    fn doubled_image_pairs_keep_both_directions() -> anyhow::Result<()> {
        let scene = SyntheticScene::orbit(1, 8, 6);
        let mut images = scene.image_set()?;
        assert!(images.ensure_pair());
        let graph = build_pair_graph(2, &GraphParams::default())?;
        let (estimates, served) = cache_then_serve(scene, &images, &graph)?;
        assert_eq!(served.len(), 2);
        assert_eq!(served[0].edge.key(), (0, 1));
        assert_eq!(served[1].edge.key(), (1, 0));
        assert_same_estimates(&served, &estimates);
        Ok(())
    }

    #[test]
    fn truncated_side_is_rejected() -> anyhow::Result<()> {
        let scene = SyntheticScene::orbit(2, 4, 3).with_view_size(1, 6, 4);
        let images = scene.image_set()?;
        let est = scene.estimate(PairEdge::new(0, 1), &EstimateOptions::default());
        let mut cache = PredictionCache::from_estimates(&images, &[est])?;
        cache.pairs[0].b.conf.pop();
        let err = cache.pairs[0].to_estimate(PairEdge::new(0, 1)).unwrap_err();
        assert!(matches!(err, FusionError::Input(_)), "{err}");
        Ok(())
    }
}
