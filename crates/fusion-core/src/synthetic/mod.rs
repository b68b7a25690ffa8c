//! Deterministic synthetic scenes for tests and demos.
//!
//! Nothing here uses thread-local randomness; every dataset is a pure
//! function of its parameters and seed.

pub mod noise;
pub mod scene;

pub use noise::{unit_sample, UniformPointNoise};
pub use scene::{EstimateOptions, SyntheticScene, SyntheticView};
