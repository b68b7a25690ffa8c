//! End-to-end multi-view fusion pipeline.
//!
//! Images are loaded by the [`store`], paired by the pair graph, predicted
//! by a [`PairwiseOracle`](oracle::PairwiseOracle), globally aligned, cleaned
//! by [`postprocess`], then written as a GLB model by [`export`] together with
//! [`visualize`] debug images.
//!
//! ## Session API
//!
//! ```no_run
//! use fusion_pipeline::session::FusionSession;
//! use fusion_pipeline::oracle::PredictionCacheOracle;
//! use fusion_pipeline::store::{discover_images, load_images};
//! use fusion_pipeline::steps::{step_align, step_build_graph, step_export, step_infer};
//! # fn main() -> anyhow::Result<()> {
//! let paths = discover_images("photos".as_ref())?;
//! let mut session = FusionSession::with_input(load_images(&paths, 512)?)?;
//! let mut oracle = PredictionCacheOracle::open("predictions.json".as_ref(), "cpu")?;
//!
//! step_build_graph(&mut session, None)?;
//! step_infer(&mut session, &mut oracle, None)?;
//! step_align(&mut session, None)?;
//! step_export(&mut session, "out".as_ref(), None)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod export;
pub mod oracle;
pub mod postprocess;
pub mod report;
pub mod session;
pub mod steps;
pub mod store;
pub mod visualize;

pub use config::{validate_config, FusionConfig, InferenceConfig, PostprocessConfig};
pub use export::{ExportOptions, ExportedModel, GeometryMode};
pub use report::FusionReport;
pub use session::{FusionSession, FusionState, LogEntry, SessionMetadata};
pub use steps::{
    run_reconstruction, step_align, step_build_graph, step_export, step_infer, step_postprocess,
    step_report, step_visualize,
};
