//! Pairwise inference oracle interface.
//!
//! The network that predicts dense point maps for an image pair lives outside
//! this workspace. Anything implementing [`PairwiseOracle`] can feed the
//! pipeline; [`run_inference`] batches the pair graph through it.

mod cache;
mod synthetic;

pub use cache::{
    CachedPose, CachedPrediction, CachedSide, ImageKey, PredictionCache, PredictionCacheOracle,
};
pub use synthetic::SyntheticOracle;

use fusion_core::{FusionError, ImageSet, PairEdge, PairGraph, PairwiseEstimate, Result};

/// Produces one [`PairwiseEstimate`] per requested pair.
///
/// Implementations must be deterministic for fixed inputs so that results do
/// not depend on how the pairs are batched.
pub trait PairwiseOracle {
    fn name(&self) -> &str;

    /// Estimates for `pairs`, in the same order.
    fn infer(&mut self, images: &ImageSet, pairs: &[PairEdge]) -> Result<Vec<PairwiseEstimate>>;
}

/// Run the oracle over every edge of `graph`, `batch_size` pairs at a time.
///
/// Every returned estimate is checked against its edge and the image shapes.
pub fn run_inference(
    oracle: &mut dyn PairwiseOracle,
    images: &ImageSet,
    graph: &PairGraph,
    batch_size: usize,
) -> Result<Vec<PairwiseEstimate>> {
    if batch_size == 0 {
        return Err(FusionError::input("batch size must be positive"));
    }
    if graph.num_images != images.len() {
        return Err(FusionError::input(format!(
            "pair graph covers {} images, image set has {}",
            graph.num_images,
            images.len()
        )));
    }

    let mut estimates = Vec::with_capacity(graph.len());
    for (b, batch) in graph.edges.chunks(batch_size).enumerate() {
        let out = oracle.infer(images, batch)?;
        if out.len() != batch.len() {
            return Err(FusionError::input(format!(
                "oracle '{}' returned {} estimates for a batch of {}",
                oracle.name(),
                out.len(),
                batch.len()
            )));
        }
        for (edge, est) in batch.iter().zip(&out) {
            if edge.key() != est.edge.key() {
                return Err(FusionError::input(format!(
                    "oracle '{}' answered pair {:?} with {:?}",
                    oracle.name(),
                    edge.key(),
                    est.edge.key()
                )));
            }
            est.validate(images)?;
        }
        log::debug!("batch {b}: {} pairs", batch.len());
        estimates.extend(out.into_iter().zip(batch).map(|(mut est, edge)| {
            est.edge = *edge;
            est
        }));
    }
    log::info!(
        "inference with '{}': {} pairs in batches of {batch_size}",
        oracle.name(),
        estimates.len()
    );
    Ok(estimates)
}
