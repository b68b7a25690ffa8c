//! Reconstruction session framework.
//!
//! A mutable state container driven by step functions:
//!
//! ```no_run
//! use fusion_pipeline::session::FusionSession;
//! use fusion_pipeline::oracle::PredictionCacheOracle;
//! use fusion_pipeline::steps::run_reconstruction;
//! # fn main() -> anyhow::Result<()> {
//! # let images = unimplemented!();
//! let mut session = FusionSession::with_input(images)?;
//! let mut oracle = PredictionCacheOracle::open("predictions.json".as_ref(), "cpu")?;
//! let report = run_reconstruction(&mut session, &mut oracle, "out".as_ref(), None)?;
//! println!("{} points", report.exported_points);
//! # Ok(())
//! # }
//! ```

pub mod fusion_session;
pub mod types;

pub use fusion_session::{FusionSession, FusionState, PIPELINE_NAME, SCHEMA_VERSION};
pub use types::{current_timestamp, ArtifactKind, ArtifactRecord, LogEntry, SessionMetadata};
