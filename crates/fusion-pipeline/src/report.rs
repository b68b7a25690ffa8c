//! Summary of a finished reconstruction, printed by the CLI as JSON.

use std::path::PathBuf;

use fusion_core::{Mat4, Real};
use serde::{Deserialize, Serialize};

use crate::export::GeometryMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    pub num_images: usize,
    /// A single input image was duplicated to form a pair.
    pub doubled_input: bool,
    pub num_edges: usize,
    pub initial_loss: Real,
    pub final_loss: Real,
    pub iterations: usize,
    pub timed_out: bool,
    pub cleaned_pixels: Option<usize>,
    pub sky_pixels: Option<usize>,
    pub geometry_mode: GeometryMode,
    pub exported_points: usize,
    pub exported_faces: usize,
    pub scene_path: Option<PathBuf>,
    pub debug_images: Vec<PathBuf>,
    /// Row-major camera-to-world poses in the exported frame.
    pub camera_poses: Vec<[[Real; 4]; 4]>,
    pub focals: Vec<Real>,
}

/// Row-major copy of a 4×4 matrix.
pub fn mat4_rows(m: &Mat4) -> [[Real; 4]; 4] {
    std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_row_major() {
        let mut m = Mat4::identity();
        m[(0, 3)] = 2.5;
        let rows = mat4_rows(&m);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 2.5]);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
