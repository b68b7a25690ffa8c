//! Core types for multi-view fusion.
//!
//! This crate holds the data model shared by every stage:
//!
//! - math aliases and the centered pinhole model ([`math`]),
//! - row-major pixel grids for depth, confidence, masks, points and colors ([`grid`]),
//! - prepared input images ([`image`]),
//! - the pair graph builder ([`graph`]),
//! - pairwise estimates and the confidence transform ([`estimate`]),
//! - the fatal error taxonomy ([`error`]),
//! - deterministic synthetic scenes ([`synthetic`]).

pub mod error;
pub mod estimate;
pub mod graph;
pub mod grid;
pub mod image;
pub mod math;
pub mod synthetic;

pub use error::{ensure_same_len, FusionError, Result};
pub use estimate::{ConfTransform, PairwiseEstimate};
pub use graph::{build_pair_graph, DisjointSet, GraphParams, GraphPolicy, PairEdge, PairGraph};
pub use grid::{Grid, Mask, PointMap, RgbImage, ScalarMap};
pub use image::{ImageSet, InputImage};
pub use math::*;
