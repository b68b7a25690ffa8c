//! Reconstruction session container with mutable state.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use fusion_core::{ImageSet, PairGraph, PairwiseEstimate};
use fusion_optim::{AlignmentReport, Scene};

use super::types::{ArtifactKind, ArtifactRecord, LogEntry, SessionMetadata};
use crate::config::{validate_config, FusionConfig};
use crate::export::ExportedModel;
use crate::postprocess::PostprocessSummary;
use crate::report::FusionReport;

pub const PIPELINE_NAME: &str = "multi_view_fusion";
pub const SCHEMA_VERSION: u32 = 1;

/// Intermediate results, filled in step by step.
///
/// Every field is owned by exactly one step; rerunning a step clears what
/// the later steps derived from it.
#[derive(Debug, Clone, Default)]
pub struct FusionState {
    /// The single input image was duplicated to form a pair.
    pub doubled_input: bool,
    pub graph: Option<PairGraph>,
    pub estimates: Option<Vec<PairwiseEstimate>>,
    pub scene: Option<Scene>,
    pub alignment: Option<AlignmentReport>,
    pub postprocess: Option<PostprocessSummary>,
    pub model: Option<ExportedModel>,
    pub scene_path: Option<PathBuf>,
    pub debug_images: Vec<PathBuf>,
}

impl FusionState {
    /// Drop everything derived from the pair graph.
    pub fn clear_after_graph(&mut self) {
        self.estimates = None;
        self.clear_after_inference();
    }

    /// Drop everything derived from the pairwise estimates.
    pub fn clear_after_inference(&mut self) {
        self.scene = None;
        self.alignment = None;
        self.clear_after_alignment();
    }

    /// Drop post-processing and export results.
    pub fn clear_after_alignment(&mut self) {
        self.postprocess = None;
        self.model = None;
        self.scene_path = None;
        self.debug_images.clear();
    }
}

/// A reconstruction session.
///
/// Holds the configuration, the input images, the intermediate state and
/// the final report. Step functions in [`crate::steps`] mutate it in place.
#[derive(Debug, Clone)]
pub struct FusionSession {
    pub metadata: SessionMetadata,

    /// Always present; defaults unless set.
    pub config: FusionConfig,

    input: Option<ImageSet>,

    pub state: FusionState,

    output: Option<FusionReport>,

    /// Files written by the export and visualize steps.
    pub artifacts: Vec<ArtifactRecord>,

    /// Operation log (lightweight audit trail).
    pub log: Vec<LogEntry>,
}

impl Default for FusionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionSession {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(PIPELINE_NAME, SCHEMA_VERSION),
            config: FusionConfig::default(),
            input: None,
            state: FusionState::default(),
            output: None,
            artifacts: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            metadata: SessionMetadata::new(PIPELINE_NAME, SCHEMA_VERSION).described(description),
            ..Self::new()
        }
    }

    pub fn with_input(input: ImageSet) -> Result<Self> {
        let mut session = Self::new();
        session.set_input(input)?;
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the input images; clears all state and output.
    pub fn set_input(&mut self, input: ImageSet) -> Result<()> {
        ensure!(!input.is_empty(), "input image set is empty");
        self.state = FusionState::default();
        self.output = None;
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&ImageSet> {
        self.input.as_ref()
    }

    pub(crate) fn input_mut(&mut self) -> Option<&mut ImageSet> {
        self.input.as_mut()
    }

    pub fn require_input(&self) -> Result<&ImageSet> {
        self.input
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("input not set"))
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the configuration after validating it. Existing state is kept;
    /// rerun the steps to apply the new values.
    pub fn set_config(&mut self, config: FusionConfig) -> Result<()> {
        validate_config(&config)?;
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    pub fn update_config<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut FusionConfig),
    {
        let mut new_config = self.config.clone();
        f(&mut new_config);
        self.set_config(new_config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────────

    pub fn output(&self) -> Option<&FusionReport> {
        self.output.as_ref()
    }

    pub fn require_output(&self) -> Result<&FusionReport> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("output not computed"))
    }

    pub fn set_output(&mut self, output: FusionReport) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Input is present and the configuration is valid.
    pub fn validate(&self) -> Result<()> {
        self.require_input()?;
        validate_config(&self.config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    pub(crate) fn record_artifact(&mut self, kind: ArtifactKind, path: impl Into<PathBuf>) {
        self.artifacts.push(ArtifactRecord::new(kind, path));
        self.metadata.touch();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reset
    // ─────────────────────────────────────────────────────────────────────────

    /// Reset state and output, keeping input and config.
    pub fn reset_state(&mut self) {
        self.state = FusionState::default();
        self.output = None;
        self.metadata.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::synthetic::SyntheticScene;

    #[test]
    fn new_session_is_empty() {
        let session = FusionSession::new();
        assert!(!session.has_input());
        assert!(!session.has_output());
        assert!(session.require_input().is_err());
        assert_eq!(session.metadata.pipeline, PIPELINE_NAME);
    }

    #[test]
    fn setting_input_clears_state() -> anyhow::Result<()> {
        let images = SyntheticScene::orbit(2, 8, 6).image_set()?;
        let mut session = FusionSession::with_input(images.clone())?;
        session.state.doubled_input = true;
        session.state.debug_images.push("x.png".into());
        session.set_input(images)?;
        assert!(!session.state.doubled_input);
        assert!(session.state.debug_images.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut session = FusionSession::new();
        let err = session.update_config(|c| c.optimize.niter = 0);
        assert!(err.is_err());
        assert_eq!(session.config.optimize.niter, 300);
    }

    #[test]
    fn clearing_cascades_downstream() {
        let mut state = FusionState {
            scene_path: Some("scene.glb".into()),
            postprocess: Some(PostprocessSummary::default()),
            ..FusionState::default()
        };
        state.clear_after_graph();
        assert!(state.scene_path.is_none());
        assert!(state.postprocess.is_none());
    }
}
