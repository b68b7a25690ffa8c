//! Pair graph construction.
//!
//! A [`PairGraph`] lists the ordered image pairs handed to the pairwise
//! inference oracle. The policy is a tagged variant resolved once here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{FusionError, Result};

/// Which image pairs get compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphPolicy {
    /// Every unordered pair of distinct images.
    Complete,
    /// Image `i` paired with `i+1 ..= i+window`.
    ///
    /// Non-cyclic windows stop at the last image; cyclic windows wrap modulo N.
    SlidingWindow {
        window: usize,
        #[serde(default)]
        cyclic: bool,
    },
    /// Every other image paired with image `reference`.
    SingleReference { reference: usize },
}

impl Default for GraphPolicy {
    fn default() -> Self {
        Self::Complete
    }
}

/// Graph policy plus symmetrization switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphParams {
    pub policy: GraphPolicy,
    /// Add `(b, a)` for every selected `(a, b)`.
    pub symmetrize: bool,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            policy: GraphPolicy::Complete,
            symmetrize: true,
        }
    }
}

/// One ordered image pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairEdge {
    pub a: usize,
    pub b: usize,
    /// `true` when the edge was added by symmetrization.
    pub symmetrized: bool,
}

impl PairEdge {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            a,
            b,
            symmetrized: false,
        }
    }

    /// The reverse edge, flagged as symmetrized.
    pub fn reversed(&self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            symmetrized: true,
        }
    }

    /// Directed key `(a, b)`.
    #[inline]
    pub fn key(&self) -> (usize, usize) {
        (self.a, self.b)
    }

    /// Undirected key `(min, max)`.
    #[inline]
    pub fn unordered(&self) -> (usize, usize) {
        (self.a.min(self.b), self.a.max(self.b))
    }

    pub fn contains(&self, image: usize) -> bool {
        self.a == image || self.b == image
    }
}

/// Directed edge set over `num_images` images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairGraph {
    pub num_images: usize,
    pub edges: Vec<PairEdge>,
}

impl PairGraph {
    /// Build a graph from explicit edges, checking endpoints and duplicates.
    pub fn from_edges(num_images: usize, edges: Vec<PairEdge>) -> Result<Self> {
        let graph = Self { num_images, edges };
        graph.validate()?;
        Ok(graph)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for e in &self.edges {
            if e.a >= self.num_images || e.b >= self.num_images {
                return Err(FusionError::input(format!(
                    "edge ({}, {}) references an image outside 0..{}",
                    e.a, e.b, self.num_images
                )));
            }
            if e.a == e.b {
                return Err(FusionError::input(format!("self edge ({0}, {0})", e.a)));
            }
            if !seen.insert(e.key()) {
                return Err(FusionError::input(format!(
                    "duplicate edge ({}, {})",
                    e.a, e.b
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Distinct undirected pairs in ascending order.
    pub fn unordered_pairs(&self) -> Vec<(usize, usize)> {
        self.edges
            .iter()
            .map(PairEdge::unordered)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Images not reachable from `root` when edges are treated as undirected.
    pub fn unreachable_from(&self, root: usize) -> Vec<usize> {
        let mut ds = DisjointSet::new(self.num_images);
        for e in &self.edges {
            ds.union(e.a, e.b);
        }
        if root >= self.num_images {
            return (0..self.num_images).collect();
        }
        let root_set = ds.find(root);
        (0..self.num_images)
            .filter(|&i| ds.find(i) != root_set)
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.num_images > 0 && self.unreachable_from(0).is_empty()
    }
}

/// Union-find with path halving and union by size.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`; `false` when they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Select the image pairs to compare.
///
/// Base edges come first in policy order, followed by their reverses when
/// `params.symmetrize` is set. The result never contains a directed pair twice.
pub fn build_pair_graph(num_images: usize, params: &GraphParams) -> Result<PairGraph> {
    if num_images < 2 {
        return Err(FusionError::input(format!(
            "pair graph needs at least 2 images, got {num_images}"
        )));
    }

    let mut base: Vec<(usize, usize)> = Vec::new();
    let mut seen_unordered = BTreeSet::new();
    let mut push = |a: usize, b: usize, base: &mut Vec<(usize, usize)>| {
        if a != b && seen_unordered.insert((a.min(b), a.max(b))) {
            base.push((a, b));
        }
    };

    match params.policy {
        GraphPolicy::Complete => {
            for i in 0..num_images {
                for j in (i + 1)..num_images {
                    push(i, j, &mut base);
                }
            }
        }
        GraphPolicy::SlidingWindow { window, cyclic } => {
            if window == 0 {
                return Err(FusionError::input("sliding window size must be >= 1"));
            }
            for i in 0..num_images {
                for k in 1..=window {
                    let j = i + k;
                    if cyclic {
                        push(i, j % num_images, &mut base);
                    } else if j < num_images {
                        push(i, j, &mut base);
                    }
                }
            }
        }
        GraphPolicy::SingleReference { reference } => {
            if reference >= num_images {
                return Err(FusionError::input(format!(
                    "reference image {reference} out of range for {num_images} images"
                )));
            }
            for j in 0..num_images {
                push(reference, j, &mut base);
            }
        }
    }

    let mut edges: Vec<PairEdge> = base.iter().map(|&(a, b)| PairEdge::new(a, b)).collect();
    if params.symmetrize {
        let mut directed: BTreeSet<(usize, usize)> = base.iter().copied().collect();
        for &(a, b) in &base {
            if directed.insert((b, a)) {
                edges.push(PairEdge::new(a, b).reversed());
            }
        }
    }

    log::debug!(
        "pair graph: {} images, {:?}, symmetrize={} -> {} edges",
        num_images,
        params.policy,
        params.symmetrize,
        edges.len()
    );
    PairGraph::from_edges(num_images, edges)
}
