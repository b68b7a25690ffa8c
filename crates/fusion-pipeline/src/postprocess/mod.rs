//! Confidence post-processing on an aligned scene.
//!
//! Both passes only ever lower confidences, and they can run in either order.

mod clean;
mod sky;

pub use clean::{clean_pointcloud, CleanOptions};
pub use sky::{mask_sky, segment_sky, SkyMaskOptions};

use serde::{Deserialize, Serialize};

/// What the post-processing passes changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessSummary {
    /// Pixels suppressed by the consistency check, if it ran.
    pub cleaned_pixels: Option<usize>,
    /// Pixels suppressed as sky, if the pass ran.
    pub sky_pixels: Option<usize>,
}
