use fusion_core::{FusionError, Iso3, Mat3, Pt3, Real, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("need at least 3 weighted correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("source and target have different lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("source points are degenerate (zero spread)")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
}

impl From<RegistrationError> for FusionError {
    fn from(err: RegistrationError) -> Self {
        FusionError::input(format!("similarity registration: {err}"))
    }
}

/// Similarity transform `x -> scale * R x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sim3 {
    pub scale: Real,
    pub rotation: UnitQuaternion<Real>,
    pub translation: Vec3,
}

impl Sim3 {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: UnitQuaternion::identity(),
            translation: Vec3::zeros(),
        }
    }

    #[inline]
    pub fn transform_point(&self, p: &Pt3) -> Pt3 {
        Pt3::from(self.rotation * p.coords * self.scale + self.translation)
    }

    /// Rigid pose obtained by mapping the frame of `pose` through this similarity.
    ///
    /// The scale only affects the translation: `R = R_s R_p`, `t = s R_s t_p + t_s`.
    pub fn compose_rigid(&self, pose: &Iso3) -> Iso3 {
        let rotation = self.rotation * pose.rotation;
        let translation =
            self.rotation * pose.translation.vector * self.scale + self.translation;
        Iso3::from_parts(Translation3::from(translation), rotation)
    }
}

/// Weighted Umeyama alignment: the similarity minimizing `Σ w |dst - S(src)|²`.
///
/// Correspondences with non-finite coordinates or non-positive weight are ignored.
pub fn weighted_umeyama(src: &[Pt3], dst: &[Pt3], weights: &[Real]) -> Result<Sim3, RegistrationError> {
    if src.len() != dst.len() || src.len() != weights.len() {
        return Err(RegistrationError::LengthMismatch(src.len(), dst.len()));
    }

    let valid = |i: usize| {
        weights[i] > 0.0
            && weights[i].is_finite()
            && src[i].coords.iter().all(|v| v.is_finite())
            && dst[i].coords.iter().all(|v| v.is_finite())
    };

    let mut w_sum = 0.0;
    let mut mu_s = Vec3::zeros();
    let mut mu_d = Vec3::zeros();
    let mut count = 0usize;
    for i in (0..src.len()).filter(|&i| valid(i)) {
        w_sum += weights[i];
        mu_s += src[i].coords * weights[i];
        mu_d += dst[i].coords * weights[i];
        count += 1;
    }
    if count < 3 {
        return Err(RegistrationError::NotEnoughPoints(count));
    }
    mu_s /= w_sum;
    mu_d /= w_sum;

    let mut cov = Mat3::zeros();
    let mut var_s = 0.0;
    for i in (0..src.len()).filter(|&i| valid(i)) {
        let ds = src[i].coords - mu_s;
        let dd = dst[i].coords - mu_d;
        cov += dd * ds.transpose() * weights[i];
        var_s += weights[i] * ds.norm_squared();
    }
    cov /= w_sum;
    var_s /= w_sum;
    if var_s <= Real::EPSILON {
        return Err(RegistrationError::Degenerate);
    }

    let svd = cov.svd(true, true);
    let u = svd.u.ok_or(RegistrationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RegistrationError::SvdFailed)?;

    // Reflection guard: flip the smallest singular direction if needed.
    let mut s = Vec3::new(1.0, 1.0, 1.0);
    if (u * v_t).determinant() < 0.0 {
        s.z = -1.0;
    }
    let r = u * Mat3::from_diagonal(&s) * v_t;
    let scale = svd.singular_values.dot(&s) / var_s;
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = mu_d - rotation * mu_s * scale;

    Ok(Sim3 {
        scale,
        rotation,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> Vec<Pt3> {
        (0..40)
            .map(|i| {
                let t = i as Real;
                Pt3::new((t * 0.37).sin(), (t * 0.91).cos(), 2.0 + 0.1 * t)
            })
            .collect()
    }

    #[test]
    fn recovers_known_similarity() {
        let truth = Sim3 {
            scale: 2.5,
            rotation: UnitQuaternion::from_euler_angles(0.3, -0.2, 0.7),
            translation: Vec3::new(1.0, -2.0, 0.5),
        };
        let src = cloud();
        let dst: Vec<Pt3> = src.iter().map(|p| truth.transform_point(p)).collect();
        let w = vec![1.0; src.len()];
        let est = weighted_umeyama(&src, &dst, &w).unwrap();
        assert!((est.scale - truth.scale).abs() < 1e-9);
        assert!(est.rotation.angle_to(&truth.rotation) < 1e-9);
        assert!((est.translation - truth.translation).norm() < 1e-9);
    }

    #[test]
    fn zero_weight_outliers_are_ignored() {
        let truth = Sim3 {
            scale: 0.5,
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.4, 0.0),
            translation: Vec3::new(0.0, 0.2, 0.0),
        };
        let src = cloud();
        let mut dst: Vec<Pt3> = src.iter().map(|p| truth.transform_point(p)).collect();
        let mut w = vec![1.0; src.len()];
        dst[3] = Pt3::new(100.0, 100.0, 100.0);
        w[3] = 0.0;
        dst[5] = Pt3::new(Real::NAN, 0.0, 0.0);
        let est = weighted_umeyama(&src, &dst, &w).unwrap();
        assert!((est.scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn compose_rigid_matches_point_mapping() {
        let sim = Sim3 {
            scale: 3.0,
            rotation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            translation: Vec3::new(0.5, 0.0, -1.0),
        };
        let pose = Iso3::from_parts(
            Translation3::new(0.2, 0.1, 0.0),
            UnitQuaternion::from_euler_angles(-0.3, 0.0, 0.2),
        );
        // A point at depth d in the camera maps to sim(pose(p)) = composed(p * s).
        let p = Pt3::new(0.1, -0.2, 1.5);
        let lhs = sim.transform_point(&pose.transform_point(&p));
        let rhs = sim.compose_rigid(&pose).transform_point(&Pt3::from(p.coords * 3.0));
        assert!((lhs - rhs).norm() < 1e-12);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let src = cloud()[..2].to_vec();
        let w = vec![1.0; 2];
        assert!(matches!(
            weighted_umeyama(&src, &src, &w),
            Err(RegistrationError::NotEnoughPoints(2))
        ));
    }
}
