//! Closed-form initialization for global alignment.
//!
//! - [`weighted_umeyama`]: similarity registration between point sets.
//! - [`estimate_focal`]: least-squares focal length from a point map.
//! - [`minimum_spanning_tree`]: confidence-weighted tree over the pair graph.
//! - [`initialize_from_estimates`]: poses, depths and focals seeded along the tree.

mod focal;
mod init;
mod registration;
mod spanning_tree;

pub use focal::*;
pub use init::*;
pub use registration::*;
pub use spanning_tree::*;
