use fusion_core::{FusionError, PointMap, Real, ScalarMap};

/// Least-squares focal length from a camera-frame point map.
///
/// With the principal point at the image center, every pixel `(u, v)` with
/// point `(X, Y, Z)` gives `u - cx ≈ f X / Z` and `v - cy ≈ f Y / Z`; the
/// weighted normal equation has the closed form
/// `f = Σ w ((u - cx) x' + (v - cy) y') / Σ w (x'² + y'²)`.
///
/// Pixels behind the camera or with non-positive weight are skipped.
pub fn estimate_focal(points: &PointMap, weights: &ScalarMap) -> Result<Real, FusionError> {
    points.ensure_same_shape(weights, "focal estimation weights")?;
    let cx = points.width() as Real / 2.0;
    let cy = points.height() as Real / 2.0;

    let mut num = 0.0;
    let mut den = 0.0;
    for y in 0..points.height() {
        for x in 0..points.width() {
            let p = points.get(x, y);
            let w = *weights.get(x, y);
            if !(w > 0.0) || !(p.z > 1e-12) || !p.x.is_finite() || !p.y.is_finite() {
                continue;
            }
            let xp = p.x / p.z;
            let yp = p.y / p.z;
            num += w * ((x as Real - cx) * xp + (y as Real - cy) * yp);
            den += w * (xp * xp + yp * yp);
        }
    }

    if !(den > 0.0) || !(num > 0.0) {
        return Err(FusionError::input(format!(
            "cannot estimate focal length from a {}x{} point map",
            points.width(),
            points.height()
        )));
    }
    Ok(num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::{Grid, PinholeIntrinsics, Pt3};

    #[test]
    fn recovers_focal_of_a_tilted_plane() {
        let k = PinholeIntrinsics::centered(37.5, 32, 24);
        let pts = Grid::from_fn(32, 24, |x, y| {
            k.backproject(x as Real, y as Real, 2.0 + 0.03 * x as Real + 0.01 * y as Real)
        });
        let w = Grid::filled(32, 24, 1.0);
        let f = estimate_focal(&pts, &w).unwrap();
        assert!((f - 37.5).abs() < 1e-9, "f = {f}");
    }

    #[test]
    fn focal_is_invariant_to_point_scale() {
        let k = PinholeIntrinsics::centered(20.0, 16, 12);
        let pts = Grid::from_fn(16, 12, |x, y| k.backproject(x as Real, y as Real, 3.0));
        let scaled = pts.map(|p| Pt3::from(p.coords * 0.1));
        let w = Grid::filled(16, 12, 1.0);
        let a = estimate_focal(&pts, &w).unwrap();
        let b = estimate_focal(&scaled, &w).unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn all_zero_weights_fail() {
        let pts = Grid::filled(4, 4, Pt3::new(0.0, 0.0, 1.0));
        let w = Grid::filled(4, 4, 0.0);
        assert!(estimate_focal(&pts, &w).is_err());
    }
}
