use crate::local_moving::LocalMoving;
use crate::objective::modularity;
use crate::{Clustering, Network};
use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Default resolution for Louvain
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Settings for a Louvain run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LouvainParams {
    /// Modularity resolution. Larger values give more, smaller clusters.
    pub resolution: f64,
    /// Number of random starts; the clustering with the highest modularity is kept.
    pub n_starts: usize,
    /// Maximal number of full Louvain passes per start.
    pub n_iterations: usize,
    /// Seed for the node visiting order
    pub seed: u64,
}

impl Default for LouvainParams {
    fn default() -> Self {
        LouvainParams {
            resolution: DEFAULT_RESOLUTION,
            n_starts: 10,
            n_iterations: 10,
            seed: 0,
        }
    }
}

/// Perform the Louvain clustering algorithm
pub struct Louvain {
    rng: ChaCha20Rng,
    local_moving: LocalMoving,
}

impl Louvain {
    /// Initialize the Louvain algorithm for `network`. The resolution is scaled by the
    /// network's total edge weight once, here, and reused on every aggregation level.
    pub fn new(resolution: f64, network: &Network, seed: u64) -> Louvain {
        let total = 2.0 * network.total_edge_weight() + network.total_edge_weight_self_links();
        let scaled = if total > 0.0 { resolution / total } else { 0.0 };

        Louvain {
            rng: ChaCha20Rng::seed_from_u64(seed),
            local_moving: LocalMoving::new(scaled),
        }
    }

    /// Run one Louvain pass: local moving, then recursion on the aggregate network.
    /// Returns true if cluster labels were updated, otherwise returns false.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering) -> bool {
        if n.nodes() <= 1 {
            return false;
        }

        let mut update = self.local_moving.iterate(n, c, &mut self.rng);

        if c.num_clusters() < n.nodes() {
            let reduced_n = n.create_reduced_network(c);
            let mut reduced_c = Clustering::singletons(reduced_n.nodes());

            if self.iterate(&reduced_n, &mut reduced_c) {
                update = true;
                c.merge_clusters(&reduced_c);
            }
        }

        update
    }

    /// Cluster `network` with several random starts and keep the best result.
    /// Clusters in the returned clustering are numbered by decreasing size.
    /// Returns the clustering and its modularity.
    pub fn run(network: &Network, params: &LouvainParams) -> (Clustering, f64) {
        let mut louvain = Louvain::new(params.resolution, network, params.seed);

        let mut best: Option<(Clustering, f64)> = None;
        for start in 0..params.n_starts.max(1) {
            let mut clustering = Clustering::singletons(network.nodes());

            let mut iteration = 0;
            while iteration < params.n_iterations.max(1) {
                let update = louvain.iterate(network, &mut clustering);
                iteration += 1;
                if !update {
                    break;
                }
            }

            let q = modularity(params.resolution, network, &clustering);
            debug!(
                "louvain start {}: {} clusters after {} iterations, modularity {:.4}",
                start,
                clustering.num_clusters(),
                iteration,
                q
            );

            if best.as_ref().map_or(true, |(_, best_q)| q > *best_q) {
                best = Some((clustering, q));
            }
        }

        let (mut clustering, q) = best.unwrap_or_else(|| (Clustering::singletons(network.nodes()), 0.0));
        clustering.order_by_size();
        (clustering, q)
    }
}
