//! Graph-based clustering of the SNN graph over a sweep of resolutions.

use crate::metadata::ResolutionClusters;
use crate::nn::snn_network;
use anyhow::{bail, Error};
use log::{debug, info};
use louvain::{Clustering, Louvain, LouvainParams, Network};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::time::Instant;

/// Resolutions 0.0, 0.1, ..., 2.0
pub fn default_resolutions() -> Vec<f64> {
    (0..=20).map(|i| i as f64 / 10.0).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub resolutions: Vec<f64>,
    /// Resolution reported as `seurat_clusters` and used for markers
    pub chosen_resolution: f64,
    pub n_starts: usize,
    pub n_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            resolutions: default_resolutions(),
            chosen_resolution: 0.5,
            n_starts: 10,
            n_iterations: 10,
            seed: 0,
        }
    }
}

/// Move every cell that sits alone in its cluster to the cluster it is most
/// connected to in `snn`, by mean edge weight. Singletons are merged one at a time
/// in cell order, and each merge counts toward the members and size of its target
/// for the singletons after it. Ties go to the lowest label.
/// Labels that end up unused are left as gaps.
pub fn group_singletons(labels: &mut [usize], snn: &CsMat<f64>) {
    let n_labels = labels.iter().max().map_or(0, |&m| m + 1);
    let mut sizes = vec![0usize; n_labels];
    for &l in labels.iter() {
        sizes[l] += 1;
    }
    // only clusters with several cells to begin with can receive singletons
    let targets: Vec<bool> = sizes.iter().map(|&s| s > 1).collect();
    if !targets.contains(&true) {
        return;
    }

    let singletons: Vec<usize> = (0..labels.len()).filter(|&c| sizes[labels[c]] == 1).collect();
    if singletons.is_empty() {
        return;
    }
    let snn = snn.to_csr();
    for cell in singletons {
        let mut weight = vec![0.0; n_labels];
        if let Some(row) = snn.outer_view(cell) {
            for (j, &w) in row.iter() {
                if j != cell {
                    weight[labels[j]] += w;
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for l in (0..n_labels).filter(|&l| targets[l]) {
            let connectivity = weight[l] / sizes[l] as f64;
            if best.map_or(true, |(_, b)| connectivity > b) {
                best = Some((l, connectivity));
            }
        }
        if let Some((l, c)) = best {
            debug!("merging singleton cell {} into cluster {} (connectivity {:.4})", cell, l, c);
            sizes[labels[cell]] -= 1;
            sizes[l] += 1;
            labels[cell] = l;
        }
    }
}

/// Cluster `network` at one resolution. Singletons are merged into their best
/// connected cluster and labels are ordered by decreasing cluster size.
pub fn cluster_at_resolution(
    snn: &CsMat<f64>,
    network: &Network,
    resolution: f64,
    params: &ClusterParams,
) -> ResolutionClusters {
    let louvain_params = LouvainParams {
        resolution,
        n_starts: params.n_starts,
        n_iterations: params.n_iterations,
        seed: params.seed,
    };
    let (clustering, modularity) = Louvain::run(network, &louvain_params);
    debug!(
        "resolution {}: {} clusters before singleton grouping, modularity {:.4}",
        resolution,
        clustering.num_clusters(),
        modularity
    );

    let mut labels = clustering.labels().to_vec();
    group_singletons(&mut labels, snn);
    let mut clustering = Clustering::from_labels(&labels);
    clustering.order_by_size();

    ResolutionClusters {
        resolution,
        clusters: clustering.labels().iter().map(|&l| l as u32).collect(),
    }
}

/// Cluster the SNN graph at every resolution in `params.resolutions`.
pub fn find_clusters(snn: &CsMat<f64>, params: &ClusterParams) -> Result<Vec<ResolutionClusters>, Error> {
    if snn.rows() == 0 {
        bail!("cannot cluster an empty graph");
    }
    if let Some(r) = params.resolutions.iter().find(|r| !r.is_finite() || **r < 0.0) {
        bail!("invalid clustering resolution {}", r);
    }

    let tick = Instant::now();
    let network = snn_network(snn);
    let results: Vec<ResolutionClusters> = params
        .resolutions
        .par_iter()
        .map(|&r| cluster_at_resolution(snn, &network, r, params))
        .collect();

    for res in &results {
        info!("resolution {}: {} clusters", res.resolution, res.num_clusters());
    }
    info!(
        "clustered {} cells at {} resolutions in {:.2}s",
        snn.rows(),
        results.len(),
        tick.elapsed().as_secs_f64()
    );
    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;
    use sprs::TriMat;

    /// Symmetric graph with unit self links
    fn graph(n: usize, edges: &[(usize, usize, f64)]) -> CsMat<f64> {
        let mut tri = TriMat::new((n, n));
        for i in 0..n {
            tri.add_triplet(i, i, 1.0);
        }
        for &(i, j, w) in edges {
            tri.add_triplet(i, j, w);
            tri.add_triplet(j, i, w);
        }
        tri.to_csr()
    }

    /// Two dense groups (0..6 and 6..10) joined by one weak edge
    fn two_groups() -> CsMat<f64> {
        let mut edges = Vec::new();
        for (lo, hi) in [(0, 6), (6, 10)] {
            for i in lo..hi {
                for j in i + 1..hi {
                    edges.push((i, j, 0.8));
                }
            }
        }
        edges.push((5, 6, 0.1));
        graph(10, &edges)
    }

    #[test]
    fn test_resolutions() {
        let r = default_resolutions();
        assert_eq!(r.len(), 21);
        assert_eq!(r[5], 0.5);
        assert_eq!(r[20], 2.0);
        assert_eq!(crate::metadata::resolution_column(r[3]), "SCT_snn_res.0.3");
    }

    #[test]
    fn test_group_singletons() {
        let snn = graph(5, &[(0, 1, 0.5), (2, 3, 0.5), (4, 0, 0.2), (4, 2, 0.4), (4, 3, 0.3)]);
        let mut labels = vec![0, 0, 1, 1, 2];
        group_singletons(&mut labels, &snn);
        // mean to cluster 0: 0.2 / 2, to cluster 1: 0.7 / 2
        assert_eq!(labels, vec![0, 0, 1, 1, 1]);

        // unconnected singleton goes to the lowest label
        let snn = graph(5, &[(0, 1, 0.5), (2, 3, 0.5)]);
        let mut labels = vec![1, 1, 0, 0, 2];
        group_singletons(&mut labels, &snn);
        assert_eq!(labels, vec![1, 1, 0, 0, 0]);

        // a merged singleton counts toward its cluster for later singletons
        let snn = graph(
            8,
            &[
                (0, 1, 0.5),
                (2, 3, 0.5),
                (3, 4, 0.5),
                (4, 5, 0.5),
                (6, 0, 0.3),
                (6, 2, 0.5),
                (6, 7, 0.8),
                (7, 2, 0.3),
                (7, 3, 0.3),
                (7, 4, 0.3),
            ],
        );
        let mut labels = vec![0, 0, 1, 1, 1, 1, 2, 3];
        group_singletons(&mut labels, &snn);
        // cell 6: 0.3 / 2 against 0.5 / 4; cell 7 then sees 0.8 / 3 against 0.9 / 4
        assert_eq!(labels, vec![0, 0, 1, 1, 1, 1, 0, 0]);

        // only singletons: nothing to merge into
        let mut labels = vec![0, 1, 2];
        group_singletons(&mut labels, &graph(3, &[]));
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn test_find_clusters() {
        let snn = two_groups();
        let params = ClusterParams {
            resolutions: vec![0.0, 0.8],
            ..ClusterParams::default()
        };
        let res = find_clusters(&snn, &params).unwrap();
        assert_eq!(res.len(), 2);

        // resolution 0 merges every connected component
        assert_eq!(res[0].num_clusters(), 1);
        assert_eq!(res[0].column_name(), "SCT_snn_res.0");

        // the larger group is cluster 0
        assert_eq!(res[1].clusters, vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);

        // deterministic
        assert_eq!(find_clusters(&snn, &params).unwrap(), res);
    }

    #[test]
    fn test_find_clusters_errors() {
        let params = ClusterParams {
            resolutions: vec![-1.0],
            ..ClusterParams::default()
        };
        assert!(find_clusters(&two_groups(), &params).is_err());
        assert!(find_clusters(&CsMat::zero((0, 0)), &ClusterParams::default()).is_err());
    }
}
