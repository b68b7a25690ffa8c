use fusion_core::synthetic::{EstimateOptions, SyntheticScene, UniformPointNoise};
use fusion_core::{build_pair_graph, GraphParams, GraphPolicy, PairGraph, PairwiseEstimate};
use fusion_optim::{AlignOptions, FocalMode, GlobalAligner, LrSchedule, OptimizeOptions, ScenePhase};

fn noisy_estimates(scene: &SyntheticScene, graph: &PairGraph, seed: u64) -> Vec<PairwiseEstimate> {
    let opts = EstimateOptions {
        seed,
        noise: UniformPointNoise {
            seed,
            max_abs: 0.002,
        },
        ..EstimateOptions::default()
    };
    graph.edges.iter().map(|e| scene.estimate(*e, &opts)).collect()
}

#[test]
fn noisy_sliding_window_alignment_recovers_cameras() -> anyhow::Result<()> {
    let truth = SyntheticScene::orbit(5, 24, 18);
    let graph = build_pair_graph(
        5,
        &GraphParams {
            policy: GraphPolicy::SlidingWindow {
                window: 2,
                cyclic: false,
            },
            symmetrize: true,
        },
    )?;
    let estimates = noisy_estimates(&truth, &graph, 11);
    let images = truth.image_set()?;

    let mut aligner = GlobalAligner::new(graph, estimates, AlignOptions::default())?;
    aligner.initialize(&images)?;
    let report = aligner.optimize(&OptimizeOptions {
        niter: 100,
        schedule: LrSchedule::Linear,
        ..OptimizeOptions::default()
    })?;

    assert_eq!(aligner.phase(), ScenePhase::Converged);
    assert!(report.final_loss <= report.initial_loss * 1.01);
    assert!(report.loss_history.iter().all(|l| l.is_finite()));

    let poses = aligner.scene().poses();
    let focals = aligner.scene().focals();
    for i in 1..5 {
        let est = poses[0].inverse() * poses[i];
        let gt = truth.views[0].cam_to_world.inverse() * truth.views[i].cam_to_world;
        assert!(est.rotation.angle_to(&gt.rotation) < 0.02, "camera {i}");
        let rel = (focals[i] - truth.views[i].focal).abs() / truth.views[i].focal;
        assert!(rel < 0.05, "camera {i} focal {}", focals[i]);
    }
    Ok(())
}

#[test]
fn shared_focal_stays_shared() -> anyhow::Result<()> {
    let truth = SyntheticScene::orbit(3, 16, 12);
    let graph = build_pair_graph(3, &GraphParams::default())?;
    let estimates = noisy_estimates(&truth, &graph, 3);
    let images = truth.image_set()?;
    let mut aligner = GlobalAligner::new(
        graph,
        estimates,
        AlignOptions {
            focal_mode: FocalMode::Shared,
            ..AlignOptions::default()
        },
    )?;
    aligner.initialize(&images)?;
    aligner.optimize(&OptimizeOptions {
        niter: 30,
        ..OptimizeOptions::default()
    })?;
    let f = aligner.scene().focals();
    assert!((f[0] - f[1]).abs() < 1e-9 && (f[1] - f[2]).abs() < 1e-9);
    Ok(())
}

#[test]
fn disconnected_graph_fails_initialization() -> anyhow::Result<()> {
    let truth = SyntheticScene::orbit(4, 8, 6);
    let graph = PairGraph::from_edges(
        4,
        vec![
            fusion_core::PairEdge::new(0, 1),
            fusion_core::PairEdge::new(1, 0),
            fusion_core::PairEdge::new(2, 3),
        ],
    )?;
    let estimates = noisy_estimates(&truth, &graph, 0);
    let images = truth.image_set()?;
    let mut aligner = GlobalAligner::new(graph, estimates, AlignOptions::default())?;
    let err = aligner.initialize(&images).unwrap_err();
    match err {
        fusion_core::FusionError::DisconnectedGraph { unreachable, .. } => {
            assert_eq!(unreachable, vec![2, 3])
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(aligner.phase(), ScenePhase::Uninitialized);
    Ok(())
}
