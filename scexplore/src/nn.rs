use anyhow::{bail, Error};
use log::info;
use louvain::Network;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::time::Instant;
use umap_rs::knn::nearest_neighbors;
use umap_rs::DistanceType;

/// Settings for the shared-nearest-neighbor graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborParams {
    /// Number of leading principal components used as coordinates
    pub n_dims: usize,
    /// Neighborhood size, counting the cell itself
    pub k_param: usize,
    /// SNN entries below this Jaccard index are dropped
    pub prune_snn: f64,
}

impl Default for NeighborParams {
    fn default() -> Self {
        NeighborParams {
            n_dims: 20,
            k_param: 20,
            prune_snn: 1.0 / 15.0,
        }
    }
}

/// Compute the `k` nearest neighbors of each row in `v`, using Euclidean distance.
/// Column 0 holds the row itself.
pub fn knn(v: ArrayView2<f64>, k: usize) -> Array2<usize> {
    info!("querying {} points for {} neighbors", v.nrows(), k);
    let (indices, _) = nearest_neighbors(v, k, DistanceType::Euclidean);
    indices
}

/// Shared-nearest-neighbor graph from a kNN table (one row per cell, self included).
/// Entry `(i, j)` is the Jaccard index `s / (2k - s)` of the two neighbor sets, where
/// `s` is the number of shared neighbors; entries below `prune` are dropped. The
/// result is symmetric, in CSR layout, with ones on the diagonal.
pub fn compute_snn(nn: &Array2<usize>, prune: f64) -> CsMat<f64> {
    let (n, k) = nn.dim();

    // cells listing `m` among their neighbors
    let mut listed_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, row) in nn.outer_iter().enumerate() {
        for &m in row.iter() {
            listed_by[m].push(i);
        }
    }

    let rows: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map_init(
            || vec![0u32; n],
            |shared, i| {
                let mut touched = Vec::new();
                for &m in nn.row(i).iter() {
                    for &j in &listed_by[m] {
                        if shared[j] == 0 {
                            touched.push(j);
                        }
                        shared[j] += 1;
                    }
                }
                touched.sort_unstable();

                let mut row = Vec::with_capacity(touched.len());
                for j in touched {
                    let s = shared[j] as f64;
                    shared[j] = 0;
                    let jaccard = s / (2.0 * k as f64 - s);
                    if jaccard >= prune {
                        row.push((j, jaccard));
                    }
                }
                row
            },
        )
        .collect();

    let mut indptr = Vec::with_capacity(n + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for row in rows {
        for (j, v) in row {
            indices.push(j);
            data.push(v);
        }
        indptr.push(indices.len());
    }
    CsMat::new((n, n), indptr, indices, data)
}

/// Network for modularity clustering: each SNN edge once, self links left out.
pub fn snn_network(snn: &CsMat<f64>) -> Network {
    let edges = snn
        .iter()
        .filter(|(_, (i, j))| i < j)
        .map(|(&w, (i, j))| (i, j, w));
    Network::from_edges(snn.rows(), edges)
}

/// kNN and SNN graph over the first `params.n_dims` columns of `embeddings`.
pub fn find_neighbors(embeddings: ArrayView2<f64>, params: &NeighborParams) -> Result<CsMat<f64>, Error> {
    let (n_cells, n_pcs) = embeddings.dim();
    if n_cells == 0 {
        bail!("no cells to build a neighbor graph from");
    }
    if params.k_param == 0 {
        bail!("k_param must be positive");
    }
    let dims = params.n_dims.min(n_pcs);
    let tick = Instant::now();
    let nn = knn(embeddings.slice(ndarray::s![.., ..dims]), params.k_param);
    let snn = compute_snn(&nn, params.prune_snn);
    info!(
        "SNN graph: {} cells, {} dims, {} edges in {:.2}s",
        n_cells,
        dims,
        snn.nnz(),
        tick.elapsed().as_secs_f64()
    );
    Ok(snn)
}
