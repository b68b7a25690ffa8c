//! Pipeline configuration.
//!
//! Every section has serde defaults, so a JSON file only needs the fields it
//! changes.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use fusion_core::{GraphParams, GraphPolicy};
use fusion_optim::{AlignOptions, OptimizeOptions};
use serde::{Deserialize, Serialize};

use crate::export::ExportOptions;
use crate::postprocess::{CleanOptions, SkyMaskOptions};
use crate::visualize::VisualizeOptions;

/// Inference batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Pairs submitted to the oracle per call.
    pub batch_size: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { batch_size: 1 }
    }
}

/// Post-processing switches and their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    pub clean_depth: bool,
    pub clean: CleanOptions,
    pub mask_sky: bool,
    pub sky: SkyMaskOptions,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            clean_depth: true,
            clean: CleanOptions::default(),
            mask_sky: true,
            sky: SkyMaskOptions::default(),
        }
    }
}

/// Complete configuration of a reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Resize target: 224 (square crop) or a multiple of 16 for the long side.
    pub image_size: u32,
    pub graph: GraphParams,
    pub inference: InferenceConfig,
    pub align: AlignOptions,
    pub optimize: OptimizeOptions,
    pub post: PostprocessConfig,
    pub export: ExportOptions,
    pub visualize: VisualizeOptions,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            image_size: 512,
            graph: GraphParams::default(),
            inference: InferenceConfig::default(),
            align: AlignOptions::default(),
            optimize: OptimizeOptions::default(),
            post: PostprocessConfig::default(),
            export: ExportOptions::default(),
            visualize: VisualizeOptions::default(),
        }
    }
}

impl FusionConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn graph_params(&self) -> GraphParams {
        self.graph
    }

    pub fn align_opts(&self) -> AlignOptions {
        self.align
    }

    pub fn optimize_opts(&self) -> OptimizeOptions {
        self.optimize
    }
}

/// Reject configurations that cannot produce a reconstruction.
pub fn validate_config(config: &FusionConfig) -> Result<()> {
    ensure!(
        config.image_size == 224 || (config.image_size >= 32 && config.image_size % 16 == 0),
        "image_size must be 224 or a multiple of 16 >= 32, got {}",
        config.image_size
    );
    match config.graph.policy {
        GraphPolicy::SlidingWindow { window, .. } => {
            ensure!(window >= 1, "sliding window size must be >= 1")
        }
        GraphPolicy::Complete | GraphPolicy::SingleReference { .. } => {}
    }
    ensure!(config.inference.batch_size > 0, "batch_size must be positive");
    let opt = &config.optimize;
    ensure!(opt.niter > 0, "niter must be positive");
    ensure!(
        opt.lr > 0.0 && opt.lr.is_finite(),
        "learning rate must be positive, got {}",
        opt.lr
    );
    ensure!(
        opt.lr_min >= 0.0 && opt.lr_min <= opt.lr,
        "lr_min must lie in [0, lr], got {}",
        opt.lr_min
    );
    if let Some(budget) = opt.time_budget_secs {
        ensure!(budget >= 0.0, "time budget must be non-negative");
    }
    ensure!(
        config.export.min_conf_thr.is_finite() && config.export.min_conf_thr >= 0.0,
        "min_conf_thr must be finite and non-negative, got {}",
        config.export.min_conf_thr
    );
    ensure!(config.export.cam_size > 0.0, "cam_size must be positive");
    if let Some(ratio) = config.export.max_depth_ratio {
        ensure!(ratio >= 1.0, "max_depth_ratio must be >= 1, got {ratio}");
    }
    ensure!(
        config.post.clean.tolerance >= 0.0 && config.post.clean.tolerance < 1.0,
        "clean tolerance must lie in [0, 1)"
    );
    ensure!(
        (0.0..=1.0).contains(&config.post.sky.min_area_fraction),
        "sky min_area_fraction must lie in [0, 1]"
    );
    Ok(())
}
