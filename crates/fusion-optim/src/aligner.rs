//! Global alignment of pairwise estimates.
//!
//! [`GlobalAligner`] owns the [`Scene`] and drives it through
//! `Uninitialized → Initialized → Optimizing → Converged`.

use std::time::Instant;

use fusion_core::{
    ensure_same_len, ConfTransform, FusionError, ImageSet, PairGraph, PairwiseEstimate,
    PinholeIntrinsics, Pt3, Real, Result, ScalarMap,
};
use fusion_linear::{initialize_from_estimates, weighted_umeyama, InitialScene};
use serde::{Deserialize, Serialize};

use crate::adam::Adam;
use crate::loss::{evaluate, EdgeTerm, SideSamples};
use crate::params::{AlignParams, EdgeParams, ViewParams};
use crate::scene::{Scene, ScenePhase, SceneView};
use crate::schedule::LrSchedule;

/// How focal lengths are optimized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocalMode {
    /// One focal per image.
    #[default]
    PerImage,
    /// One focal shared by all images.
    Shared,
    /// Focals stay at their initial estimate.
    Fixed,
}

/// Model options fixed for the lifetime of an aligner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignOptions {
    pub conf_trf: ConfTransform,
    pub focal_mode: FocalMode,
    /// Image whose camera defines the world frame during alignment.
    pub root: usize,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            conf_trf: ConfTransform::Log,
            focal_mode: FocalMode::PerImage,
            root: 0,
        }
    }
}

/// Iteration budget and step size of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    pub niter: usize,
    pub schedule: LrSchedule,
    pub lr: Real,
    pub lr_min: Real,
    /// Wall-clock budget in seconds; on expiry the best parameters are kept.
    pub time_budget_secs: Option<Real>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            niter: 300,
            schedule: LrSchedule::Cosine,
            lr: 0.01,
            lr_min: 1e-6,
            time_budget_secs: None,
        }
    }
}

/// Diagnostics of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub initial_loss: Real,
    pub final_loss: Real,
    /// Iterations actually performed.
    pub iterations: usize,
    pub timed_out: bool,
    /// Loss before each update.
    pub loss_history: Vec<Real>,
    pub elapsed_secs: Real,
}

const ADAM_BETAS: (Real, Real) = (0.9, 0.9);
const ADAM_EPS: Real = 1e-8;

#[derive(Debug, Clone)]
struct AlignState {
    base_depths: Vec<ScalarMap>,
    params: AlignParams,
    terms: Vec<EdgeTerm>,
}

/// Fuses pairwise estimates into one consistent [`Scene`].
#[derive(Debug, Clone)]
pub struct GlobalAligner {
    graph: PairGraph,
    estimates: Vec<PairwiseEstimate>,
    options: AlignOptions,
    scene: Scene,
    state: Option<AlignState>,
}

impl GlobalAligner {
    /// `estimates[i]` must belong to `graph.edges[i]`.
    pub fn new(
        graph: PairGraph,
        estimates: Vec<PairwiseEstimate>,
        options: AlignOptions,
    ) -> Result<Self> {
        graph.validate()?;
        ensure_same_len("pairwise estimates", graph.len(), estimates.len())?;
        for (i, (edge, est)) in graph.edges.iter().zip(&estimates).enumerate() {
            if edge.key() != est.edge.key() {
                return Err(FusionError::input(format!(
                    "estimate {i} is for pair {:?}, graph edge is {:?}",
                    est.edge.key(),
                    edge.key()
                )));
            }
        }
        Ok(Self {
            graph,
            estimates,
            options,
            scene: Scene::uninitialized(options.conf_trf),
            state: None,
        })
    }

    pub fn phase(&self) -> ScenePhase {
        self.scene.phase()
    }

    pub fn options(&self) -> &AlignOptions {
        &self.options
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Hand the scene over to post-processing and export.
    pub fn into_scene(self) -> Scene {
        self.scene
    }

    /// Seed poses, depths and focals from the spanning tree and build the loss terms.
    pub fn initialize(&mut self, images: &ImageSet) -> Result<&Scene> {
        if self.scene.phase() != ScenePhase::Uninitialized {
            return Err(FusionError::input(format!(
                "aligner already initialized (scene is {})",
                self.scene.phase()
            )));
        }
        ensure_same_len("images", self.graph.num_images, images.len())?;
        for est in &self.estimates {
            est.validate(images)?;
        }

        let n = images.len();
        let conf_trf = self.options.conf_trf;
        let InitialScene {
            poses,
            focals,
            mut depths,
            tree,
        } = initialize_from_estimates(n, &self.estimates, self.options.root, conf_trf)?;
        log::debug!("initialized {} cameras over {} tree edges", n, tree.edges.len());

        // Edge similarities registered against the seeded world points.
        let world: Vec<Vec<Pt3>> = (0..n)
            .map(|i| {
                let k = PinholeIntrinsics::centered(
                    focals[i],
                    depths[i].width(),
                    depths[i].height(),
                );
                let (w, h) = depths[i].shape();
                let mut pts = Vec::with_capacity(w * h);
                for y in 0..h {
                    for x in 0..w {
                        let p = k.backproject(x as Real, y as Real, *depths[i].get(x, y));
                        pts.push(poses[i].transform_point(&p));
                    }
                }
                pts
            })
            .collect();

        let mut edges = Vec::with_capacity(self.estimates.len());
        for est in &self.estimates {
            let (a, b) = (est.edge.a, est.edge.b);
            let src: Vec<Pt3> = est.pts_a.iter().chain(est.pts_b.iter()).copied().collect();
            let dst: Vec<Pt3> = world[a].iter().chain(world[b].iter()).copied().collect();
            let mut w: Vec<Real> = est
                .conf_a
                .iter()
                .chain(est.conf_b.iter())
                .map(|&c| conf_trf.weight(c))
                .collect();
            if !w.iter().any(|&v| v > 0.0) {
                w.iter_mut().for_each(|v| *v = 1.0);
            }
            let sim = weighted_umeyama(&src, &dst, &w)?;
            edges.push(EdgeParams {
                rotation: sim.rotation,
                translation: sim.translation,
                log_scale: sim.scale.ln(),
            });
        }

        // Rescale the world so the edge scales have unit geometric mean.
        let mut params = AlignParams {
            views: Vec::with_capacity(n),
            edges,
        };
        let mean_log = params.mean_edge_log_scale();
        let k = (-mean_log).exp();
        for e in &mut params.edges {
            e.log_scale -= mean_log;
            e.translation *= k;
        }
        for d in &mut depths {
            d.as_mut_slice().iter_mut().for_each(|v| *v *= k);
        }
        let shared_log_focal =
            focals.iter().map(|f| f.ln()).sum::<Real>() / focals.len().max(1) as Real;
        for (pose, focal) in poses.iter().zip(&focals) {
            params.views.push(ViewParams {
                rotation: pose.rotation,
                translation: pose.translation.vector * k,
                log_scale: 0.0,
                log_focal: match self.options.focal_mode {
                    FocalMode::Shared => shared_log_focal,
                    _ => focal.ln(),
                },
            });
        }

        // Per-image confidence: pixelwise maximum over the edges it appears in.
        let mut confidence: Vec<ScalarMap> = images
            .iter()
            .map(|img| ScalarMap::filled(img.width(), img.height(), 0.0))
            .collect();
        for est in &self.estimates {
            for (img, conf) in [(est.edge.a, &est.conf_a), (est.edge.b, &est.conf_b)] {
                for (dst, &c) in confidence[img].as_mut_slice().iter_mut().zip(conf.iter()) {
                    if c > *dst {
                        *dst = c;
                    }
                }
            }
        }

        let terms = self
            .estimates
            .iter()
            .map(|est| EdgeTerm {
                side_a: SideSamples::build(
                    est.edge.a,
                    &est.pts_a,
                    &est.conf_a,
                    &depths[est.edge.a],
                    conf_trf,
                ),
                side_b: SideSamples::build(
                    est.edge.b,
                    &est.pts_b,
                    &est.conf_b,
                    &depths[est.edge.b],
                    conf_trf,
                ),
            })
            .collect();

        let views = images
            .iter()
            .zip(confidence)
            .zip(&params.views)
            .zip(&depths)
            .map(|(((img, conf), vp), depth)| SceneView {
                name: img.name.clone(),
                image: img.rgb.clone(),
                cam_to_world: vp.pose(),
                focal: vp.log_focal.exp(),
                depth: depth.clone(),
                confidence: conf,
            })
            .collect();
        self.scene = Scene::from_views(views, conf_trf)?;
        self.state = Some(AlignState {
            base_depths: depths,
            params,
            terms,
        });
        log::info!(
            "global alignment initialized: {} images, {} edges",
            n,
            self.estimates.len()
        );
        Ok(&self.scene)
    }

    /// Current alignment loss, if initialized.
    pub fn loss(&self) -> Option<Real> {
        self.state
            .as_ref()
            .map(|s| evaluate(&s.terms, &s.params, self.options.focal_mode).loss)
    }

    /// Run the first-order optimization for `opts.niter` iterations.
    ///
    /// Fails with [`FusionError::OptimizationDiverged`] as soon as the loss is
    /// not finite; the scene then stays provisional.
    pub fn optimize(&mut self, opts: &OptimizeOptions) -> Result<AlignmentReport> {
        if opts.niter == 0 {
            return Err(FusionError::input("optimization needs at least one iteration"));
        }
        if !(opts.lr > 0.0) || opts.lr_min > opts.lr {
            return Err(FusionError::input(format!(
                "invalid learning rates lr={} lr_min={}",
                opts.lr, opts.lr_min
            )));
        }
        let focal_mode = self.options.focal_mode;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| FusionError::input("optimize called before initialize"))?;

        let start = Instant::now();
        let mut adam = Adam::new(state.params.dof(), ADAM_BETAS.0, ADAM_BETAS.1, ADAM_EPS);
        let mut history = Vec::with_capacity(opts.niter);
        let mut best: Option<(Real, AlignParams)> = None;
        let mut timed_out = false;
        let mut iterations = 0;

        for it in 0..opts.niter {
            self.scene.set_phase(ScenePhase::Optimizing { iteration: it });
            let eval = evaluate(&state.terms, &state.params, focal_mode);
            if !eval.loss.is_finite() {
                return Err(FusionError::OptimizationDiverged {
                    iteration: it,
                    loss: eval.loss,
                });
            }
            history.push(eval.loss);
            if best.as_ref().map_or(true, |(l, _)| eval.loss < *l) {
                best = Some((eval.loss, state.params.clone()));
            }

            let lr = opts.schedule.lr_at(it, opts.niter, opts.lr, opts.lr_min);
            let step = adam.step(&eval.grad, lr);
            state.params.retract(&step);
            iterations = it + 1;
            write_back(&mut self.scene, state);

            if it % 50 == 0 {
                log::debug!("iter {it:>4}: loss {:.6e}, lr {lr:.3e}", eval.loss);
            }
            if let Some(budget) = opts.time_budget_secs {
                if start.elapsed().as_secs_f64() >= budget {
                    timed_out = true;
                    break;
                }
            }
        }

        let mut final_loss = evaluate(&state.terms, &state.params, focal_mode).loss;
        if !final_loss.is_finite() {
            return Err(FusionError::OptimizationDiverged {
                iteration: iterations,
                loss: final_loss,
            });
        }
        if timed_out {
            if let Some((loss, params)) = best {
                if loss < final_loss {
                    state.params = params;
                    final_loss = loss;
                }
            }
            log::warn!(
                "optimization stopped after {iterations} of {} iterations (time budget)",
                opts.niter
            );
        }
        write_back(&mut self.scene, state);
        self.scene.set_phase(ScenePhase::Converged);

        let report = AlignmentReport {
            initial_loss: history.first().copied().unwrap_or(final_loss),
            final_loss,
            iterations,
            timed_out,
            loss_history: history,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        log::info!(
            "global alignment: loss {:.6e} -> {:.6e} in {} iterations",
            report.initial_loss,
            report.final_loss,
            report.iterations
        );
        Ok(report)
    }

    #[cfg(test)]
    fn params_mut(&mut self) -> Option<&mut AlignParams> {
        self.state.as_mut().map(|s| &mut s.params)
    }
}

/// Copy the current parameters into the scene views.
fn write_back(scene: &mut Scene, state: &AlignState) {
    for ((view, vp), base) in scene
        .views_mut()
        .iter_mut()
        .zip(&state.params.views)
        .zip(&state.base_depths)
    {
        view.cam_to_world = vp.pose();
        view.focal = vp.log_focal.exp();
        let scale = vp.log_scale.exp();
        for (d, &d0) in view.depth.as_mut_slice().iter_mut().zip(base.iter()) {
            *d = d0 * scale;
        }
    }
}
