use fusion_core::synthetic::{EstimateOptions, SyntheticScene};
use fusion_core::{FusionError, ImageSet, PairEdge, PairwiseEstimate, Result};

use super::PairwiseOracle;

/// Oracle answering from a ground-truth synthetic scene.
///
/// Predictions carry an arbitrary per-pair scale and optional deterministic
/// noise, like a real network's output.
#[derive(Debug, Clone)]
pub struct SyntheticOracle {
    scene: SyntheticScene,
    opts: EstimateOptions,
}

impl SyntheticOracle {
    pub fn new(scene: SyntheticScene, opts: EstimateOptions) -> Self {
        Self { scene, opts }
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

impl PairwiseOracle for SyntheticOracle {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn infer(&mut self, images: &ImageSet, pairs: &[PairEdge]) -> Result<Vec<PairwiseEstimate>> {
        let n_views = self.scene.views.len();
        if n_views == 0 {
            return Err(FusionError::input("synthetic scene has no views"));
        }
        pairs
            .iter()
            .map(|edge| {
                // A doubled single image maps onto the one rendered view.
                let a = edge.a.min(n_views - 1);
                let b = edge.b.min(n_views - 1);
                if images.get(edge.a).is_none() || images.get(edge.b).is_none() {
                    return Err(FusionError::input(format!(
                        "pair ({}, {}) outside the image set",
                        edge.a, edge.b
                    )));
                }
                let mut est = self.scene.estimate(PairEdge::new(a, b), &self.opts);
                est.edge = *edge;
                Ok(est)
            })
            .collect()
    }
}
