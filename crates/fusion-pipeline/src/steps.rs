//! Step functions for the reconstruction pipeline.
//!
//! graph → infer → align → postprocess → export → visualize, each reading
//! what the previous steps left in [`FusionState`](crate::session::FusionState).

use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use fusion_core::{build_pair_graph, FusionError, GraphPolicy, ImageSet, PairGraph, PairwiseEstimate, Real};
use fusion_optim::{AlignOptions, AlignmentReport, GlobalAligner, LrSchedule, OptimizeOptions, Scene};

use crate::config::FusionConfig;
use crate::export::{export_scene, scene_normalization, write_model, GeometryMode};
use crate::oracle::{run_inference, PairwiseOracle};
use crate::postprocess::{clean_pointcloud, mask_sky, PostprocessSummary};
use crate::report::{mat4_rows, FusionReport};
use crate::session::{ArtifactKind, FusionSession};
use crate::visualize::{render_debug_views, save_debug_views, VisualizeOptions};

// ─────────────────────────────────────────────────────────────────────────────
// Step Options
// ─────────────────────────────────────────────────────────────────────────────

/// Overrides for the graph step.
#[derive(Debug, Clone, Default)]
pub struct GraphStepOptions {
    pub policy: Option<GraphPolicy>,
    pub symmetrize: Option<bool>,
}

/// Overrides for the inference step.
#[derive(Debug, Clone, Default)]
pub struct InferStepOptions {
    pub batch_size: Option<usize>,
}

/// Overrides for the alignment step.
#[derive(Debug, Clone, Default)]
pub struct AlignStepOptions {
    pub niter: Option<usize>,
    pub lr: Option<Real>,
    pub schedule: Option<LrSchedule>,
    pub time_budget_secs: Option<Real>,
}

/// Overrides for the post-processing step.
#[derive(Debug, Clone, Default)]
pub struct PostprocessStepOptions {
    pub clean_depth: Option<bool>,
    pub mask_sky: Option<bool>,
}

/// Overrides for the export step.
#[derive(Debug, Clone, Default)]
pub struct ExportStepOptions {
    pub min_conf_thr: Option<Real>,
    pub mode: Option<GeometryMode>,
    pub transparent_cams: Option<bool>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a failed step in the session log before propagating the error.
fn logged<T>(session: &mut FusionSession, operation: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        session.log_failure(operation, format!("{err:#}"));
    }
    result
}

fn align_scene(
    graph: PairGraph,
    estimates: Vec<PairwiseEstimate>,
    align: AlignOptions,
    images: &ImageSet,
    optimize: &OptimizeOptions,
) -> Result<(Scene, AlignmentReport)> {
    let mut aligner =
        GlobalAligner::new(graph, estimates, align).context("invalid alignment problem")?;
    aligner
        .initialize(images)
        .context("scene initialization failed")?;
    let report = aligner
        .optimize(optimize)
        .context("global alignment failed")?;
    Ok((aligner.into_scene(), report))
}

fn create_outdir(outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir).map_err(|e| FusionError::Serialization {
        path: outdir.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Build the pair graph; a single input image is duplicated first.
pub fn step_build_graph(session: &mut FusionSession, opts: Option<GraphStepOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let mut params = session.config.graph_params();
    if let Some(policy) = opts.policy {
        params.policy = policy;
    }
    if let Some(symmetrize) = opts.symmetrize {
        params.symmetrize = symmetrize;
    }

    if session.input_mut().map(ImageSet::ensure_pair).unwrap_or(false) {
        log::info!("single input image duplicated to form a pair");
        session.state.doubled_input = true;
    }
    let n = session.require_input()?.len();
    let res = build_pair_graph(n, &params)
        .with_context(|| format!("failed to build pair graph over {n} images"));
    let graph = logged(session, "graph", res)?;

    if !graph.is_connected() {
        log::warn!("pair graph over {n} images is not connected");
    }
    log::info!("pair graph: {} images, {} edges ({:?})", n, graph.len(), params.policy);
    let notes = format!("{} edges over {n} images", graph.len());
    session.state.clear_after_graph();
    session.state.graph = Some(graph);
    session.log_success_with_notes("graph", notes);
    Ok(())
}

/// Run the pairwise oracle over every edge of the graph.
pub fn step_infer(
    session: &mut FusionSession,
    oracle: &mut dyn PairwiseOracle,
    opts: Option<InferStepOptions>,
) -> Result<()> {
    session.validate()?;
    let graph = session
        .state
        .graph
        .clone()
        .ok_or_else(|| anyhow!("pair graph required before inference"))?;
    let batch_size = opts
        .unwrap_or_default()
        .batch_size
        .unwrap_or(session.config.inference.batch_size);
    ensure!(batch_size > 0, "batch size must be positive");

    let name = oracle.name().to_string();
    let images = session.require_input()?;
    let res = run_inference(oracle, images, &graph, batch_size)
        .with_context(|| format!("inference with '{name}' failed"));
    let estimates = logged(session, "infer", res)?;

    let notes = format!("{} pairs from '{name}', batch size {batch_size}", estimates.len());
    session.state.clear_after_inference();
    session.state.estimates = Some(estimates);
    session.log_success_with_notes("infer", notes);
    Ok(())
}

/// Initialize and optimize the global alignment.
pub fn step_align(session: &mut FusionSession, opts: Option<AlignStepOptions>) -> Result<()> {
    session.validate()?;
    let graph = session
        .state
        .graph
        .clone()
        .ok_or_else(|| anyhow!("pair graph required before alignment"))?;
    let estimates = session
        .state
        .estimates
        .clone()
        .ok_or_else(|| anyhow!("inference required before alignment"))?;

    let opts = opts.unwrap_or_default();
    let mut optimize = session.config.optimize_opts();
    if let Some(niter) = opts.niter {
        optimize.niter = niter;
    }
    if let Some(lr) = opts.lr {
        optimize.lr = lr;
    }
    if let Some(schedule) = opts.schedule {
        optimize.schedule = schedule;
    }
    if let Some(budget) = opts.time_budget_secs {
        optimize.time_budget_secs = Some(budget);
    }
    let align = session.config.align_opts();

    let images = session.require_input()?;
    let res = align_scene(graph, estimates, align, images, &optimize);
    let (scene, report) = logged(session, "align", res)?;

    let notes = format!(
        "loss {:.6} -> {:.6} after {} iterations{}",
        report.initial_loss,
        report.final_loss,
        report.iterations,
        if report.timed_out { " (time budget reached)" } else { "" }
    );
    session.state.clear_after_inference();
    session.state.scene = Some(scene);
    session.state.alignment = Some(report);
    session.log_success_with_notes("align", notes);
    Ok(())
}

/// Sky masking then cross-view cleaning, as enabled.
pub fn step_postprocess(
    session: &mut FusionSession,
    opts: Option<PostprocessStepOptions>,
) -> Result<()> {
    let opts = opts.unwrap_or_default();
    let post = session.config.post.clone();
    let clean = opts.clean_depth.unwrap_or(post.clean_depth);
    let sky = opts.mask_sky.unwrap_or(post.mask_sky);

    let scene = session
        .state
        .scene
        .as_mut()
        .ok_or_else(|| anyhow!("alignment required before post-processing"))?;
    let mut summary = PostprocessSummary::default();
    if sky {
        summary.sky_pixels = Some(mask_sky(scene, &post.sky).context("sky masking failed")?);
    }
    if clean {
        summary.cleaned_pixels =
            Some(clean_pointcloud(scene, &post.clean).context("point cloud cleaning failed")?);
    }

    session.state.clear_after_alignment();
    session.state.postprocess = Some(summary);
    session.log_success_with_notes(
        "postprocess",
        format!(
            "sky: {:?}, cleaned: {:?}",
            summary.sky_pixels, summary.cleaned_pixels
        ),
    );
    Ok(())
}

/// Export the scene as a GLB file in `outdir`.
pub fn step_export(
    session: &mut FusionSession,
    outdir: &Path,
    opts: Option<ExportStepOptions>,
) -> Result<()> {
    let opts = opts.unwrap_or_default();
    let mut export = session.config.export.clone();
    if let Some(thr) = opts.min_conf_thr {
        export.min_conf_thr = thr;
    }
    if let Some(mode) = opts.mode {
        export.mode = mode;
    }
    if let Some(transparent) = opts.transparent_cams {
        export.transparent_cams = transparent;
    }

    let scene = session
        .state
        .scene
        .as_ref()
        .ok_or_else(|| anyhow!("alignment required before export"))?;
    let res = export_scene(scene, &export).context("model export failed");
    let model = logged(session, "export", res)?;

    let path = outdir.join(&export.file_name);
    let res = create_outdir(outdir)
        .and_then(|()| Ok(write_model(&model, &path)?))
        .with_context(|| format!("failed to write model to {}", path.display()));
    logged(session, "export", res)?;

    session.record_artifact(ArtifactKind::Model, &path);
    session.log_success_with_notes(
        "export",
        format!(
            "{} points, {} faces -> {}",
            model.point_count(),
            model.face_count(),
            path.display()
        ),
    );
    session.state.model = Some(model);
    session.state.scene_path = Some(path);
    Ok(())
}

/// Write colorized depth and confidence images for every view.
pub fn step_visualize(
    session: &mut FusionSession,
    outdir: &Path,
    opts: Option<VisualizeOptions>,
) -> Result<()> {
    let opts = opts.unwrap_or(session.config.visualize);
    let scene = session
        .state
        .scene
        .as_ref()
        .ok_or_else(|| anyhow!("alignment required before visualization"))?;
    let views = render_debug_views(scene, &opts);
    let res = create_outdir(outdir)
        .and_then(|()| Ok(save_debug_views(&views, outdir)?))
        .context("failed to write debug images");
    let paths = logged(session, "visualize", res)?;

    for p in &paths {
        session.record_artifact(ArtifactKind::DebugImage, p);
    }
    session.log_success_with_notes("visualize", format!("{} images", paths.len()));
    session.state.debug_images = paths;
    Ok(())
}

/// Summarize the session state into a [`FusionReport`] and store it as output.
pub fn step_report(session: &mut FusionSession) -> Result<FusionReport> {
    let scene = session
        .state
        .scene
        .as_ref()
        .ok_or_else(|| anyhow!("alignment required before reporting"))?;
    let alignment = session
        .state
        .alignment
        .as_ref()
        .ok_or_else(|| anyhow!("alignment report missing"))?;
    let first = scene
        .view(0)
        .ok_or_else(|| anyhow!("scene has no views"))?;
    let normalization = scene_normalization(&first.cam_to_world);
    let post = session.state.postprocess.unwrap_or_default();
    let model = session.state.model.as_ref();

    let report = FusionReport {
        num_images: scene.len(),
        doubled_input: session.state.doubled_input,
        num_edges: session.state.graph.as_ref().map_or(0, PairGraph::len),
        initial_loss: alignment.initial_loss,
        final_loss: alignment.final_loss,
        iterations: alignment.iterations,
        timed_out: alignment.timed_out,
        cleaned_pixels: post.cleaned_pixels,
        sky_pixels: post.sky_pixels,
        geometry_mode: model.map_or(session.config.export.mode, |m| m.mode),
        exported_points: model.map_or(0, |m| m.point_count()),
        exported_faces: model.map_or(0, |m| m.face_count()),
        scene_path: session.state.scene_path.clone(),
        debug_images: session.state.debug_images.clone(),
        camera_poses: scene
            .poses()
            .iter()
            .map(|p| mat4_rows(&(normalization * p.to_homogeneous())))
            .collect(),
        focals: scene.focals(),
    };
    session.set_output(report.clone());
    session.log_success("report");
    Ok(report)
}

/// Run the full pipeline and return the report.
pub fn run_reconstruction(
    session: &mut FusionSession,
    oracle: &mut dyn PairwiseOracle,
    outdir: &Path,
    config: Option<FusionConfig>,
) -> Result<FusionReport> {
    if let Some(cfg) = config {
        session.set_config(cfg)?;
    }
    step_build_graph(session, None)?;
    step_infer(session, oracle, None)?;
    step_align(session, None)?;
    step_postprocess(session, None)?;
    step_export(session, outdir, None)?;
    if session.config.visualize.enabled {
        step_visualize(session, outdir, None)?;
    }
    step_report(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SyntheticOracle;
    use fusion_core::synthetic::{EstimateOptions, SyntheticScene};

    fn session_for(truth: &SyntheticScene) -> anyhow::Result<FusionSession> {
        let mut session = FusionSession::with_input(truth.image_set()?)?;
        session.update_config(|c| {
            c.optimize.niter = 20;
            c.post.mask_sky = false;
        })?;
        Ok(session)
    }

    #[test]
    fn log_entries_recorded_through_pipeline() -> anyhow::Result<()> {
        let truth = SyntheticScene::orbit(3, 16, 12);
        let mut session = session_for(&truth)?;
        let mut oracle = SyntheticOracle::new(truth, EstimateOptions::default());
        let dir = tempfile::tempdir()?;

        let report = run_reconstruction(&mut session, &mut oracle, dir.path(), None)?;
        let ops: Vec<&str> = session.log.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(
            ops,
            ["graph", "infer", "align", "postprocess", "export", "visualize", "report"]
        );
        assert!(session.log.iter().all(|e| e.success));
        assert_eq!(report.num_edges, 6);
        assert_eq!(report.debug_images.len(), 9);
        assert_eq!(session.artifacts.len(), 10);
        assert_eq!(session.require_output()?, &report);
        Ok(())
    }

    #[test]
    fn steps_require_their_predecessors() -> anyhow::Result<()> {
        let truth = SyntheticScene::orbit(2, 8, 6);
        let mut session = session_for(&truth)?;
        assert!(step_align(&mut session, None).is_err());
        assert!(step_postprocess(&mut session, None).is_err());
        let dir = tempfile::tempdir()?;
        assert!(step_export(&mut session, dir.path(), None).is_err());

        let mut oracle = SyntheticOracle::new(truth, EstimateOptions::default());
        assert!(step_infer(&mut session, &mut oracle, None).is_err());
        Ok(())
    }

    #[test]
    fn divergence_is_logged_and_downcastable() -> anyhow::Result<()> {
        let truth = SyntheticScene::orbit(2, 8, 6);
        let mut session = session_for(&truth)?;
        let mut oracle = SyntheticOracle::new(truth, EstimateOptions::default());
        step_build_graph(&mut session, None)?;
        step_infer(&mut session, &mut oracle, None)?;

        let err = step_align(
            &mut session,
            Some(AlignStepOptions {
                lr: Some(1e300),
                ..AlignStepOptions::default()
            }),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FusionError>(),
            Some(FusionError::OptimizationDiverged { .. })
        ));
        let last = session.log.last().unwrap();
        assert_eq!(last.operation, "align");
        assert!(!last.success);
        assert!(session.state.scene.is_none());
        Ok(())
    }

    #[test]
    fn single_image_is_doubled() -> anyhow::Result<()> {
        let truth = SyntheticScene::orbit(1, 8, 6);
        let mut session = session_for(&truth)?;
        step_build_graph(&mut session, None)?;
        assert!(session.state.doubled_input);
        assert_eq!(session.require_input()?.len(), 2);
        assert_eq!(session.state.graph.as_ref().map(PairGraph::len), Some(2));
        Ok(())
    }

    #[test]
    fn graph_overrides_apply() -> anyhow::Result<()> {
        let truth = SyntheticScene::orbit(4, 8, 6);
        let mut session = session_for(&truth)?;
        step_build_graph(
            &mut session,
            Some(GraphStepOptions {
                policy: Some(GraphPolicy::SingleReference { reference: 2 }),
                symmetrize: Some(false),
            }),
        )?;
        let graph = session.state.graph.as_ref().unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.edges.iter().all(|e| e.contains(2)));
        Ok(())
    }
}
