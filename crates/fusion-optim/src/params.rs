//! Parameter blocks of the global alignment problem.
//!
//! Layout of the flat gradient/step vector:
//! - per image (8): rotation tangent (3), translation (3), log depth scale, log focal;
//! - per edge (7): rotation tangent (3), translation (3), log scale.
//!
//! Rotations are updated on the left: `R <- exp(-δ) R`.

use fusion_core::{Iso3, Real, Vec3};
use nalgebra::{DVector, Translation3, UnitQuaternion};

pub(crate) const VIEW_DOF: usize = 8;
pub(crate) const EDGE_DOF: usize = 7;

/// Camera pose, depth scale and focal of one image.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ViewParams {
    pub rotation: UnitQuaternion<Real>,
    pub translation: Vec3,
    pub log_scale: Real,
    pub log_focal: Real,
}

impl ViewParams {
    pub fn pose(&self) -> Iso3 {
        Iso3::from_parts(Translation3::from(self.translation), self.rotation)
    }
}

/// Similarity taking an edge's point maps into the world.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EdgeParams {
    pub rotation: UnitQuaternion<Real>,
    pub translation: Vec3,
    pub log_scale: Real,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AlignParams {
    pub views: Vec<ViewParams>,
    pub edges: Vec<EdgeParams>,
}

impl AlignParams {
    pub fn dof(&self) -> usize {
        self.views.len() * VIEW_DOF + self.edges.len() * EDGE_DOF
    }

    #[inline]
    pub fn view_offset(&self, view: usize) -> usize {
        view * VIEW_DOF
    }

    #[inline]
    pub fn edge_offset(&self, edge: usize) -> usize {
        self.views.len() * VIEW_DOF + edge * EDGE_DOF
    }

    pub fn mean_edge_log_scale(&self) -> Real {
        if self.edges.is_empty() {
            return 0.0;
        }
        self.edges.iter().map(|e| e.log_scale).sum::<Real>() / self.edges.len() as Real
    }

    /// Effective edge scales, normalized to unit geometric mean.
    pub fn edge_scales(&self) -> Vec<Real> {
        let mean = self.mean_edge_log_scale();
        self.edges
            .iter()
            .map(|e| (e.log_scale - mean).exp())
            .collect()
    }

    /// Apply a descent step (parameters move by `-step`).
    pub fn retract(&mut self, step: &DVector<Real>) {
        let n_views = self.views.len();
        for (i, v) in self.views.iter_mut().enumerate() {
            let o = i * VIEW_DOF;
            let d_rot = Vec3::new(step[o], step[o + 1], step[o + 2]);
            v.rotation = UnitQuaternion::from_scaled_axis(-d_rot) * v.rotation;
            v.translation -= Vec3::new(step[o + 3], step[o + 4], step[o + 5]);
            v.log_scale -= step[o + 6];
            v.log_focal -= step[o + 7];
        }
        for (e, p) in self.edges.iter_mut().enumerate() {
            let o = n_views * VIEW_DOF + e * EDGE_DOF;
            let d_rot = Vec3::new(step[o], step[o + 1], step[o + 2]);
            p.rotation = UnitQuaternion::from_scaled_axis(-d_rot) * p.rotation;
            p.translation -= Vec3::new(step[o + 3], step[o + 4], step[o + 5]);
            p.log_scale -= step[o + 6];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AlignParams {
        AlignParams {
            views: vec![
                ViewParams {
                    rotation: UnitQuaternion::identity(),
                    translation: Vec3::zeros(),
                    log_scale: 0.0,
                    log_focal: 3.0,
                };
                2
            ],
            edges: vec![
                EdgeParams {
                    rotation: UnitQuaternion::identity(),
                    translation: Vec3::zeros(),
                    log_scale: 1.0,
                },
                EdgeParams {
                    rotation: UnitQuaternion::identity(),
                    translation: Vec3::zeros(),
                    log_scale: 3.0,
                },
            ],
        }
    }

    #[test]
    fn layout_offsets() {
        let p = params();
        assert_eq!(p.dof(), 2 * VIEW_DOF + 2 * EDGE_DOF);
        assert_eq!(p.edge_offset(1), 2 * VIEW_DOF + EDGE_DOF);
    }

    #[test]
    fn edge_scales_have_unit_geometric_mean() {
        let s = params().edge_scales();
        assert!((s[0] * s[1] - 1.0).abs() < 1e-12);
        assert!((s[1] / s[0] - (2.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn retract_moves_against_step() {
        let mut p = params();
        let mut step = DVector::zeros(p.dof());
        step[3] = 0.5;
        step[7] = 0.1;
        step[p.edge_offset(0) + 2] = 0.2;
        p.retract(&step);
        assert!((p.views[0].translation.x + 0.5).abs() < 1e-12);
        assert!((p.views[0].log_focal - 2.9).abs() < 1e-12);
        assert!((p.edges[0].rotation.angle() - 0.2).abs() < 1e-12);
    }
}
