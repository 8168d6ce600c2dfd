use crate::curve_fit::find_ab_params;
use crate::dist::DistanceType;
use crate::embedding::{make_edge_list, random_layout, scale_and_jitter};
use crate::optimize::{OptimizeParams, State};
use crate::{fuzzy, knn, spectral, Q};
use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use std::time::Instant;

/// UMAP settings. Defaults follow the usual single-cell settings: 30 neighbors,
/// cosine input distance, `min_dist` 0.3 and a 2-dimensional output.
#[derive(Clone, Debug)]
pub struct Umap {
    /// Input-space distance
    pub distance_type: DistanceType,
    /// Neighborhood size, counting the point itself
    pub n_neighbors: usize,
    /// Output dimensions
    pub n_components: usize,
    /// Minimal distance between points in the output
    pub min_dist: Q,
    /// Scale of the output distances
    pub spread: Q,
    /// Fixed number of epochs; by default 500 for small inputs and 200 for large ones
    pub n_epochs: Option<usize>,
    /// Initial learning rate
    pub learning_rate: Q,
    /// Negative samples per positive sample
    pub negative_sample_rate: usize,
    /// Number of neighbors assumed to be fully connected to each point
    pub local_connectivity: Q,
    /// Fuzzy union (1.0) vs fuzzy intersection (0.0) when symmetrizing the graph
    pub set_op_mix_ratio: Q,
    /// Weight of the repulsive term
    pub repulsion_strength: Q,
    /// Seed for initialization and sampling
    pub seed: u64,
}

impl Default for Umap {
    fn default() -> Self {
        Umap {
            distance_type: DistanceType::Cosine,
            n_neighbors: 30,
            n_components: 2,
            min_dist: 0.3,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            local_connectivity: 1.0,
            set_op_mix_ratio: 1.0,
            repulsion_strength: 1.0,
            seed: 42,
        }
    }
}

impl Umap {
    /// Number of optimization epochs used for `rows` points
    pub fn get_num_epochs(&self, rows: usize) -> usize {
        if let Some(n) = self.n_epochs {
            return n;
        }

        if rows <= 10_000 {
            500
        } else {
            200
        }
    }

    /// Build the fuzzy graph and the initial layout, ready for optimization.
    pub fn initialize_fit(&self, x: ArrayView2<Q>) -> State {
        let tick = Instant::now();
        let n_points = x.nrows();
        let n_epochs = self.get_num_epochs(n_points);
        let mut random = Pcg64Mcg::seed_from_u64(self.seed);

        let (knn_indices, knn_distances) = knn::nearest_neighbors(x, self.n_neighbors, self.distance_type);
        let graph = fuzzy::fuzzy_simplicial_set(
            &knn_indices,
            &knn_distances,
            self.local_connectivity,
            self.set_op_mix_ratio,
        );

        let embedding = match spectral::spectral_layout(&graph, self.n_components, self.seed) {
            Some(mut layout) => {
                scale_and_jitter(&mut layout, 10.0, 1e-4, &mut random);
                layout
            }
            None => {
                warn!("too few points for a spectral layout, using a random initialization");
                random_layout(n_points, self.n_components, 10.0, &mut random)
            }
        };

        let edges = make_edge_list(&graph, n_epochs, &mut random);
        let (a, b) = find_ab_params(self.spread, self.min_dist);

        info!(
            "UMAP initialization of {} points ({} edges) took {:.3}s",
            n_points,
            edges.len(),
            tick.elapsed().as_secs_f64()
        );

        let params = OptimizeParams {
            a,
            b,
            gamma: self.repulsion_strength,
            learning_rate: self.learning_rate,
            negative_sample_rate: self.negative_sample_rate,
            n_epochs,
            seed: self.seed,
        };
        State::new(params, edges, embedding)
    }

    /// Embed the rows of `x`
    pub fn fit_transform(&self, x: ArrayView2<Q>) -> Array2<Q> {
        if x.nrows() == 0 {
            return Array2::zeros((0, self.n_components));
        }
        let mut state = self.initialize_fit(x);
        let tick = Instant::now();
        state.optimize();
        info!(
            "UMAP optimization ({} epochs) took {:.3}s",
            state.n_epochs(),
            tick.elapsed().as_secs_f64()
        );
        state.into_embedding()
    }
}
