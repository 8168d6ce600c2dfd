//! Cluster tree across consecutive clustering resolutions.

use crate::metadata::ResolutionClusters;
use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Edges with a smaller `in_prop` are left out of the drawing
pub const MIN_IN_PROP: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub resolution: f64,
    pub cluster: u32,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeEdge {
    pub from_resolution: f64,
    pub from_cluster: u32,
    pub to_resolution: f64,
    pub to_cluster: u32,
    /// Cells shared by the two clusters
    pub count: usize,
    /// `count` as a fraction of the child cluster
    pub in_prop: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterTree {
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<TreeEdge>,
}

fn cluster_sizes(res: &ResolutionClusters) -> Vec<usize> {
    let mut sizes = vec![0; res.num_clusters()];
    for &c in &res.clusters {
        sizes[c as usize] += 1;
    }
    sizes
}

impl ClusterTree {
    /// Build the tree over `levels` in the given order; edges join each level to the next.
    pub fn build(levels: &[ResolutionClusters]) -> Result<ClusterTree, Error> {
        let mut tree = ClusterTree::default();
        for level in levels {
            if level.clusters.len() != levels[0].clusters.len() {
                bail!(
                    "resolution {} has {} cells, expected {}",
                    level.resolution,
                    level.clusters.len(),
                    levels[0].clusters.len()
                );
            }
            for (cluster, size) in cluster_sizes(level).into_iter().enumerate() {
                if size > 0 {
                    tree.nodes.push(TreeNode {
                        resolution: level.resolution,
                        cluster: cluster as u32,
                        size,
                    });
                }
            }
        }

        for pair in levels.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            let child_sizes = cluster_sizes(child);
            let mut counts: BTreeMap<(u32, u32), usize> = BTreeMap::new();
            for (&p, &c) in parent.clusters.iter().zip(&child.clusters) {
                *counts.entry((p, c)).or_default() += 1;
            }
            for ((p, c), count) in counts {
                tree.edges.push(TreeEdge {
                    from_resolution: parent.resolution,
                    from_cluster: p,
                    to_resolution: child.resolution,
                    to_cluster: c,
                    count,
                    in_prop: count as f64 / child_sizes[c as usize] as f64,
                });
            }
        }
        Ok(tree)
    }

    /// Edges that are drawn
    pub fn visible_edges(&self) -> impl Iterator<Item = &TreeEdge> {
        self.edges.iter().filter(|e| e.in_prop >= MIN_IN_PROP)
    }

    /// Write every edge, including those below [`MIN_IN_PROP`], as CSV.
    pub fn write_edges_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer =
            csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
        for edge in &self.edges {
            writer.serialize(edge)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn level(resolution: f64, clusters: &[u32]) -> ResolutionClusters {
        ResolutionClusters {
            resolution,
            clusters: clusters.to_vec(),
        }
    }

    #[test]
    fn test_build() {
        let levels = vec![
            level(0.0, &[0, 0, 0, 0, 0, 0]),
            level(0.1, &[0, 0, 0, 1, 1, 1]),
            level(0.2, &[0, 0, 1, 1, 2, 2]),
        ];
        let tree = ClusterTree::build(&levels).unwrap();
        assert_eq!(tree.nodes.len(), 6);
        assert_eq!(tree.nodes[0].size, 6);

        assert_eq!(tree.edges.len(), 2 + 4);
        let e = &tree.edges[2];
        assert_eq!((e.from_cluster, e.to_cluster, e.count), (0, 0, 2));
        assert_eq!(e.in_prop, 1.0);
        // child cluster 1 at 0.2 takes one cell from each parent
        let split: Vec<&TreeEdge> = tree.edges.iter().filter(|e| e.to_resolution == 0.2 && e.to_cluster == 1).collect();
        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|e| e.in_prop == 0.5));
    }

    #[test]
    fn test_visible_edges_and_csv() {
        let mut parent = vec![0u32; 20];
        parent[19] = 1;
        let levels = vec![level(0.0, &parent), level(0.1, &[0u32; 20])];
        let tree = ClusterTree::build(&levels).unwrap();
        assert_eq!(tree.edges.len(), 2);
        assert_eq!(tree.visible_edges().count(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clustree_edges.csv");
        tree.write_edges_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "from_resolution,from_cluster,to_resolution,to_cluster,count,in_prop"
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_mismatched_levels() {
        let levels = vec![level(0.0, &[0, 0]), level(0.1, &[0])];
        assert!(ClusterTree::build(&levels).is_err());
    }
}
