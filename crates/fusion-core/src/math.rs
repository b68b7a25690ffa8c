//! Mathematical utilities and type definitions.
//!
//! This module provides fundamental types used throughout the workspace and
//! the centered pinhole model shared by every stage of the pipeline.

use nalgebra::{Isometry3, Matrix3, Matrix4, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 4×4 matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Pinhole intrinsics with a single focal length and an explicit principal point.
///
/// Pixel `(x, y)` refers to integer grid coordinates; the principal point of a
/// `w × h` image sits at `(w / 2, h / 2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeIntrinsics {
    pub focal: Real,
    pub cx: Real,
    pub cy: Real,
}

impl PinholeIntrinsics {
    /// Intrinsics with the principal point at the image center.
    pub fn centered(focal: Real, width: usize, height: usize) -> Self {
        Self {
            focal,
            cx: width as Real / 2.0,
            cy: height as Real / 2.0,
        }
    }

    /// Camera-frame point seen at pixel `(x, y)` with the given z-depth.
    #[inline]
    pub fn backproject(&self, x: Real, y: Real, depth: Real) -> Pt3 {
        Pt3::new(
            (x - self.cx) / self.focal * depth,
            (y - self.cy) / self.focal * depth,
            depth,
        )
    }

    /// Project a camera-frame point; `None` behind the camera.
    #[inline]
    pub fn project(&self, p: &Pt3) -> Option<Pt2> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Pt2::new(
            self.focal * p.x / p.z + self.cx,
            self.focal * p.y / p.z + self.cy,
        ))
    }

    /// The 3×3 camera matrix.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.focal, 0.0, self.cx, 0.0, self.focal, self.cy, 0.0, 0.0, 1.0,
        )
    }
}

/// Apply a homogeneous 4×4 transform to a point.
///
/// The caller is responsible for the transform not mapping the point to infinity.
#[inline]
pub fn transform_point_h(m: &Mat4, p: &Pt3) -> Pt3 {
    let v = m * p.to_homogeneous();
    Pt3::new(v.x / v.w, v.y / v.w, v.z / v.w)
}

/// Median of a slice of finite values; `None` when the slice has no finite entry.
pub fn median(values: &[Real]) -> Option<Real> {
    let mut finite: Vec<Real> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some(0.5 * (finite[mid - 1] + finite[mid]))
    } else {
        Some(finite[mid])
    }
}
