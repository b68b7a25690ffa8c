//! Global alignment of pairwise point maps.
//!
//! The [`GlobalAligner`] consumes a pair graph and one [`PairwiseEstimate`]
//! per edge, seeds a [`Scene`] along a spanning tree and then refines every
//! camera pose, depth scale and focal with Adam over a confidence-weighted
//! point-consistency loss.
//!
//! [`PairwiseEstimate`]: fusion_core::PairwiseEstimate

mod adam;
mod aligner;
mod loss;
mod params;
mod scene;
mod schedule;

pub use adam::Adam;
pub use aligner::{AlignOptions, AlignmentReport, FocalMode, GlobalAligner, OptimizeOptions};
pub use scene::{Scene, ScenePhase, SceneView};
pub use schedule::LrSchedule;
