//! Pairwise estimates produced by the inference oracle.

use serde::{Deserialize, Serialize};

use crate::{FusionError, ImageSet, Iso3, PairEdge, PointMap, Real, Result, ScalarMap};

/// Dense prediction for one ordered pair `(a, b)`.
///
/// Both point maps live in camera `a`'s frame, in an arbitrary per-pair scale.
/// `cam_a_from_cam_b` maps camera-`b` coordinates into that same frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseEstimate {
    pub edge: PairEdge,
    /// Points of image `a`'s pixels.
    pub pts_a: PointMap,
    pub conf_a: ScalarMap,
    /// Points of image `b`'s pixels.
    pub pts_b: PointMap,
    pub conf_b: ScalarMap,
    pub cam_a_from_cam_b: Iso3,
}

impl PairwiseEstimate {
    /// Check map shapes against each other and against the source images.
    pub fn validate(&self, images: &ImageSet) -> Result<()> {
        let (a, b) = (self.edge.a, self.edge.b);
        let img_a = images
            .get(a)
            .ok_or_else(|| FusionError::input(format!("estimate references missing image {a}")))?;
        let img_b = images
            .get(b)
            .ok_or_else(|| FusionError::input(format!("estimate references missing image {b}")))?;
        let ctx = |side: &str| format!("estimate ({a}, {b}) {side}");
        img_a.rgb.ensure_same_shape(&self.pts_a, &ctx("points of a"))?;
        img_a.rgb.ensure_same_shape(&self.conf_a, &ctx("confidence of a"))?;
        img_b.rgb.ensure_same_shape(&self.pts_b, &ctx("points of b"))?;
        img_b.rgb.ensure_same_shape(&self.conf_b, &ctx("confidence of b"))?;
        Ok(())
    }

    /// Point map of `image` in the edge frame.
    pub fn points_of(&self, image: usize) -> Option<&PointMap> {
        if image == self.edge.a {
            Some(&self.pts_a)
        } else if image == self.edge.b {
            Some(&self.pts_b)
        } else {
            None
        }
    }

    pub fn confidence_of(&self, image: usize) -> Option<&ScalarMap> {
        if image == self.edge.a {
            Some(&self.conf_a)
        } else if image == self.edge.b {
            Some(&self.conf_b)
        } else {
            None
        }
    }

    /// Pose of `image`'s camera in the edge frame.
    pub fn edge_from_cam(&self, image: usize) -> Option<Iso3> {
        if image == self.edge.a {
            Some(Iso3::identity())
        } else if image == self.edge.b {
            Some(self.cam_a_from_cam_b)
        } else {
            None
        }
    }

    /// Point map of `image` expressed in its own camera frame (edge scale).
    pub fn points_in_own_frame(&self, image: usize) -> Option<PointMap> {
        let pts = self.points_of(image)?;
        let cam_from_edge = self.edge_from_cam(image)?.inverse();
        Some(pts.map(|p| cam_from_edge.transform_point(p)))
    }

    /// The same prediction seen from the other camera: edge `(b, a)` in camera `b`'s frame.
    pub fn reversed(&self) -> Self {
        let b_from_a = self.cam_a_from_cam_b.inverse();
        Self {
            edge: PairEdge::new(self.edge.b, self.edge.a),
            pts_a: self.pts_b.map(|p| b_from_a.transform_point(p)),
            conf_a: self.conf_b.clone(),
            pts_b: self.pts_a.map(|p| b_from_a.transform_point(p)),
            conf_b: self.conf_a.clone(),
            cam_a_from_cam_b: b_from_a,
        }
    }

    /// Edge quality used by the spanning tree: product of mean confidences.
    pub fn score(&self) -> Real {
        self.conf_a.mean() * self.conf_b.mean()
    }
}

/// Monotonic map from raw confidence to loss weight / threshold scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfTransform {
    /// Natural logarithm.
    #[default]
    Log,
    Identity,
}

impl ConfTransform {
    #[inline]
    pub fn apply(&self, conf: Real) -> Real {
        match self {
            Self::Log => conf.ln(),
            Self::Identity => conf,
        }
    }

    /// Transformed confidence clamped at zero; non-finite values become zero.
    #[inline]
    pub fn weight(&self, conf: Real) -> Real {
        let w = self.apply(conf);
        if w.is_finite() {
            w.max(0.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Grid, InputImage, Pt3};
    use nalgebra::{Rotation3, Translation3};

    fn estimate() -> PairwiseEstimate {
        let t = Iso3::from_parts(
            Translation3::new(0.5, 0.0, 0.1),
            Rotation3::from_euler_angles(0.0, 0.2, 0.0).into(),
        );
        let pts_b_own = Grid::from_fn(4, 3, |x, y| Pt3::new(x as Real, y as Real, 2.0));
        PairwiseEstimate {
            edge: PairEdge::new(0, 1),
            pts_a: Grid::filled(4, 3, Pt3::new(0.0, 0.0, 1.0)),
            conf_a: Grid::filled(4, 3, 2.0),
            pts_b: pts_b_own.map(|p| t.transform_point(p)),
            conf_b: Grid::filled(4, 3, 3.0),
            cam_a_from_cam_b: t,
        }
    }

    #[test]
    fn own_frame_points_undo_relative_pose() {
        let est = estimate();
        let own = est.points_in_own_frame(1).unwrap();
        assert!((own.get(3, 2) - Pt3::new(3.0, 2.0, 2.0)).norm() < 1e-12);
        assert!(est.points_in_own_frame(2).is_none());
        assert!((est.score() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn reversed_estimate_describes_the_same_geometry() {
        let est = estimate();
        let rev = est.reversed();
        assert_eq!(rev.edge.key(), (1, 0));
        let a = est.points_in_own_frame(1).unwrap();
        let b = rev.points_in_own_frame(1).unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p - q).norm() < 1e-12);
        }
        assert_eq!(rev.conf_a, est.conf_b);
    }

    #[test]
    fn validate_checks_image_shapes() {
        let est = estimate();
        let ok = ImageSet::new(vec![
            InputImage::new(0, "a", Grid::filled(4, 3, [0.0; 3])),
            InputImage::new(1, "b", Grid::filled(4, 3, [0.0; 3])),
        ])
        .unwrap();
        est.validate(&ok).unwrap();
        let bad = ImageSet::new(vec![
            InputImage::new(0, "a", Grid::filled(4, 3, [0.0; 3])),
            InputImage::new(1, "b", Grid::filled(3, 4, [0.0; 3])),
        ])
        .unwrap();
        assert!(est.validate(&bad).is_err());
    }

    #[test]
    fn log_weights_clamp_below_one() {
        let t = ConfTransform::Log;
        assert_eq!(t.weight(0.5), 0.0);
        assert_eq!(t.weight(0.0), 0.0);
        assert!((t.weight(std::f64::consts::E) - 1.0).abs() < 1e-12);
        assert_eq!(ConfTransform::Identity.weight(3.0), 3.0);
    }
}
