/// marker-gene search between two groups of cells
#[allow(clippy::module_inception)]
pub mod diff_exp;
/// distribution extension
pub mod dist;
/// statistics extension
pub mod stat;
/// Wilcoxon rank-sum test
pub mod wilcoxon;

pub use crate::diff_exp::{find_markers, MarkerParams, MarkerResult};
