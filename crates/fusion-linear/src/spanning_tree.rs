//! Maximum-confidence spanning tree over the pair graph.

use std::collections::{BTreeMap, VecDeque};

use fusion_core::{DisjointSet, FusionError, PairwiseEstimate, Real};

/// Tree edge oriented away from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEdge {
    pub parent: usize,
    pub child: usize,
    /// Index of the estimate used to place `child`.
    pub estimate: usize,
}

/// Spanning tree in breadth-first order from `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanningTree {
    pub root: usize,
    pub edges: Vec<TreeEdge>,
}

impl SpanningTree {
    /// Estimate attached to the first tree edge leaving the root.
    pub fn root_estimate(&self) -> Option<usize> {
        self.edges
            .iter()
            .find(|e| e.parent == self.root)
            .map(|e| e.estimate)
    }
}

/// For every unordered image pair, the index of its highest-scoring estimate.
///
/// Ties keep the estimate that comes first.
pub fn best_estimate_per_pair(estimates: &[PairwiseEstimate]) -> BTreeMap<(usize, usize), usize> {
    let mut best: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for (i, est) in estimates.iter().enumerate() {
        let key = est.edge.unordered();
        match best.get(&key) {
            Some(&j) if estimates[j].score() >= est.score() => {}
            _ => {
                best.insert(key, i);
            }
        }
    }
    best
}

/// Kruskal minimum spanning tree with edge cost `1 / score`.
///
/// When no estimate carries a positive finite score every edge costs the
/// same and the tree follows pair order. Fails with
/// [`FusionError::DisconnectedGraph`] when some image cannot be reached.
pub fn minimum_spanning_tree(
    num_images: usize,
    estimates: &[PairwiseEstimate],
    root: usize,
) -> Result<SpanningTree, FusionError> {
    if root >= num_images {
        return Err(FusionError::input(format!(
            "spanning tree root {root} out of range for {num_images} images"
        )));
    }

    let best = best_estimate_per_pair(estimates);
    let uniform = !best
        .values()
        .any(|&i| estimates[i].score() > 0.0 && estimates[i].score().is_finite());
    let cost = |i: usize| -> Real {
        let s = estimates[i].score();
        if uniform {
            1.0
        } else if s > 0.0 && s.is_finite() {
            1.0 / s
        } else {
            Real::INFINITY
        }
    };

    let mut candidates: Vec<((usize, usize), usize)> = best.into_iter().collect();
    // Stable sort keeps pair order among equal costs.
    candidates.sort_by(|a, b| cost(a.1).total_cmp(&cost(b.1)));

    let mut ds = DisjointSet::new(num_images);
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); num_images];
    let mut used = 0;
    for ((u, v), est) in candidates {
        if u >= num_images || v >= num_images {
            return Err(FusionError::input(format!(
                "estimate ({u}, {v}) references an image outside 0..{num_images}"
            )));
        }
        if ds.union(u, v) {
            adjacency[u].push((v, est));
            adjacency[v].push((u, est));
            used += 1;
        }
    }

    if used + 1 < num_images {
        let root_set = ds.find(root);
        let unreachable: Vec<usize> = (0..num_images).filter(|&i| ds.find(i) != root_set).collect();
        return Err(FusionError::DisconnectedGraph { root, unreachable });
    }

    for nbrs in &mut adjacency {
        nbrs.sort_unstable();
    }
    let mut visited = vec![false; num_images];
    visited[root] = true;
    let mut queue = VecDeque::from([root]);
    let mut edges = Vec::with_capacity(num_images.saturating_sub(1));
    while let Some(node) = queue.pop_front() {
        for &(next, est) in &adjacency[node] {
            if !visited[next] {
                visited[next] = true;
                edges.push(TreeEdge {
                    parent: node,
                    child: next,
                    estimate: est,
                });
                queue.push_back(next);
            }
        }
    }

    log::debug!("spanning tree from image {root}: {} edges", edges.len());
    Ok(SpanningTree { root, edges })
}
