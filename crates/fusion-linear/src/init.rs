//! Pose, depth and focal seeding by propagation along the spanning tree.

use fusion_core::{
    ConfTransform, FusionError, Iso3, PairwiseEstimate, PointMap, Pt3, Real, ScalarMap,
};

use crate::focal::estimate_focal;
use crate::registration::{weighted_umeyama, Sim3};
use crate::spanning_tree::{minimum_spanning_tree, SpanningTree};

/// Initial per-image parameters, all expressed in the root camera's frame and
/// in the scale of the root's estimate.
#[derive(Debug, Clone)]
pub struct InitialScene {
    /// Camera-to-world poses; the root is the identity.
    pub poses: Vec<Iso3>,
    pub focals: Vec<Real>,
    /// Per-image z-depth maps.
    pub depths: Vec<ScalarMap>,
    pub tree: SpanningTree,
}

/// Loss weights of an image's confidence; uniform when every weight vanishes.
fn registration_weights(conf: &ScalarMap, conf_trf: ConfTransform) -> Vec<Real> {
    let w: Vec<Real> = conf.iter().map(|&c| conf_trf.weight(c)).collect();
    if w.iter().any(|&v| v > 0.0) {
        w
    } else {
        vec![1.0; w.len()]
    }
}

fn missing(image: usize, idx: usize) -> FusionError {
    FusionError::input(format!("estimate {idx} does not observe image {image}"))
}

/// Seed every image by walking the minimum spanning tree from `root`.
///
/// The root keeps the identity pose and the point map of its best estimate.
/// Every child is placed by registering the parent's points of the connecting
/// estimate onto the parent's already-placed world points; the child's camera
/// then follows through the same similarity.
pub fn initialize_from_estimates(
    num_images: usize,
    estimates: &[PairwiseEstimate],
    root: usize,
    conf_trf: ConfTransform,
) -> Result<InitialScene, FusionError> {
    let tree = minimum_spanning_tree(num_images, estimates, root)?;
    let root_est = tree.root_estimate().ok_or_else(|| {
        FusionError::input(format!("spanning tree has no edge leaving image {root}"))
    })?;

    let mut poses: Vec<Option<Iso3>> = vec![None; num_images];
    let mut world: Vec<Option<PointMap>> = vec![None; num_images];
    let mut depths: Vec<Option<ScalarMap>> = vec![None; num_images];
    let mut focals: Vec<Real> = vec![0.0; num_images];

    let place = |image: usize,
                 est_idx: usize,
                 sim: &Sim3,
                 poses: &mut Vec<Option<Iso3>>,
                 world: &mut Vec<Option<PointMap>>,
                 depths: &mut Vec<Option<ScalarMap>>,
                 focals: &mut Vec<Real>|
     -> Result<(), FusionError> {
        let est = &estimates[est_idx];
        let edge_from_cam = est.edge_from_cam(image).ok_or_else(|| missing(image, est_idx))?;
        let pts = est.points_of(image).ok_or_else(|| missing(image, est_idx))?;
        let conf = est.confidence_of(image).ok_or_else(|| missing(image, est_idx))?;

        let pose = sim.compose_rigid(&edge_from_cam);
        let world_pts = pts.map(|p| sim.transform_point(p));
        let cam_from_world = pose.inverse();
        let depth = world_pts.map(|p| cam_from_world.transform_point(p).z);

        let own = est
            .points_in_own_frame(image)
            .ok_or_else(|| missing(image, est_idx))?;
        let weights = ScalarMap::from_vec(
            conf.width(),
            conf.height(),
            registration_weights(conf, conf_trf),
        )?;
        focals[image] = estimate_focal(&own, &weights)?;

        log::debug!(
            "placed image {image} from estimate {est_idx} (scale {:.4}, focal {:.2})",
            sim.scale,
            focals[image]
        );
        poses[image] = Some(pose);
        world[image] = Some(world_pts);
        depths[image] = Some(depth);
        Ok(())
    };

    // The root estimate's edge frame becomes the world once the root camera
    // is moved to the origin.
    let root_from_edge = estimates[root_est]
        .edge_from_cam(root)
        .ok_or_else(|| missing(root, root_est))?
        .inverse();
    let root_sim = Sim3 {
        scale: 1.0,
        rotation: root_from_edge.rotation,
        translation: root_from_edge.translation.vector,
    };
    place(
        root,
        root_est,
        &root_sim,
        &mut poses,
        &mut world,
        &mut depths,
        &mut focals,
    )?;

    for edge in &tree.edges {
        let est = &estimates[edge.estimate];
        let parent_world = world[edge.parent]
            .as_ref()
            .ok_or_else(|| FusionError::input(format!("image {} placed out of order", edge.parent)))?;
        let parent_pts = est
            .points_of(edge.parent)
            .ok_or_else(|| missing(edge.parent, edge.estimate))?;
        let parent_conf = est
            .confidence_of(edge.parent)
            .ok_or_else(|| missing(edge.parent, edge.estimate))?;
        parent_pts.ensure_same_shape(parent_world, "parent point map")?;

        let src: Vec<Pt3> = parent_pts.iter().copied().collect();
        let dst: Vec<Pt3> = parent_world.iter().copied().collect();
        let w = registration_weights(parent_conf, conf_trf);
        let sim = weighted_umeyama(&src, &dst, &w)?;
        place(
            edge.child,
            edge.estimate,
            &sim,
            &mut poses,
            &mut world,
            &mut depths,
            &mut focals,
        )?;
    }

    let poses = poses
        .into_iter()
        .enumerate()
        .map(|(i, p)| p.ok_or_else(|| FusionError::input(format!("image {i} was never placed"))))
        .collect::<Result<Vec<_>, _>>()?;
    let depths = depths
        .into_iter()
        .enumerate()
        .map(|(i, d)| d.ok_or_else(|| FusionError::input(format!("image {i} has no depth"))))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(InitialScene {
        poses,
        focals,
        depths,
        tree,
    })
}
