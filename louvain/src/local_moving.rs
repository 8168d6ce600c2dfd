use crate::{Clustering, Network, ZeroVec};
use rand::{seq::SliceRandom, Rng};

/// Moves single nodes between clusters until a full pass over the nodes leaves
/// every node where it is. `resolution` is already scaled by the total edge weight
/// of the top-level network, so it is applied as-is on aggregated networks.
#[derive(Default)]
pub(crate) struct LocalMoving {
    resolution: f64,
    cluster_weights: Vec<f64>,
    nodes_per_cluster: Vec<usize>,
    unused_clusters: Vec<usize>,
    node_order: Vec<usize>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
}

impl LocalMoving {
    pub fn new(resolution: f64) -> Self {
        LocalMoving {
            resolution,
            ..LocalMoving::default()
        }
    }

    pub fn iterate(&mut self, n: &Network, c: &mut Clustering, rng: &mut impl Rng) -> bool {
        let num_nodes = n.nodes();
        if num_nodes <= 1 {
            return false;
        }

        let mut update = false;

        self.cluster_weights.zero_len(num_nodes);
        self.nodes_per_cluster.zero_len(num_nodes);
        for i in 0..num_nodes {
            self.cluster_weights[c.get(i)] += n.weight(i);
            self.nodes_per_cluster[c.get(i)] += 1;
        }

        // stack of cluster ids with no members
        self.unused_clusters.clear();
        for i in (0..num_nodes).rev() {
            if self.nodes_per_cluster[i] == 0 {
                self.unused_clusters.push(i);
            }
        }

        self.node_order.clear();
        self.node_order.extend(0..num_nodes);
        self.node_order.shuffle(rng);

        self.edge_weight_per_cluster.zero_len(num_nodes);
        self.neighboring_clusters.clear();

        // Visit nodes cyclically in the shuffled order until `num_nodes` consecutive
        // visits have left the clustering unchanged.
        let mut num_stable_nodes = 0;
        let mut i = 0;
        while num_stable_nodes < num_nodes {
            let j = self.node_order[i];
            let current_cluster = c.get(j);
            let node_weight = n.weight(j);

            self.cluster_weights[current_cluster] -= node_weight;
            self.nodes_per_cluster[current_cluster] -= 1;
            if self.nodes_per_cluster[current_cluster] == 0 {
                self.unused_clusters.push(current_cluster);
            }

            // Candidate clusters: an empty cluster, plus every cluster the node is connected to.
            self.neighboring_clusters.clear();
            if let Some(&empty) = self.unused_clusters.last() {
                self.neighboring_clusters.push(empty);
            }
            for (target, edge_weight) in n.neighbors(j) {
                let neighbor_cluster = c.get(target);
                if self.edge_weight_per_cluster[neighbor_cluster] == 0.0 {
                    self.neighboring_clusters.push(neighbor_cluster);
                }
                self.edge_weight_per_cluster[neighbor_cluster] += edge_weight;
            }

            // Pick the candidate with the largest modularity gain, measured against
            // staying put. Ties with the current cluster keep the node where it is;
            // other ties go to the lowest cluster id.
            let mut best_cluster = current_cluster;
            let mut max_increment = self.edge_weight_per_cluster[current_cluster]
                - node_weight * self.cluster_weights[current_cluster] * self.resolution;
            for &l in &self.neighboring_clusters {
                let increment =
                    self.edge_weight_per_cluster[l] - node_weight * self.cluster_weights[l] * self.resolution;
                if increment > max_increment
                    || (increment == max_increment && best_cluster != current_cluster && l < best_cluster)
                {
                    best_cluster = l;
                    max_increment = increment;
                }
            }
            for &l in &self.neighboring_clusters {
                self.edge_weight_per_cluster[l] = 0.0;
            }

            self.cluster_weights[best_cluster] += node_weight;
            self.nodes_per_cluster[best_cluster] += 1;
            if Some(&best_cluster) == self.unused_clusters.last() {
                self.unused_clusters.pop();
            }

            if best_cluster == current_cluster {
                num_stable_nodes += 1;
            } else {
                c.set(j, best_cluster);
                num_stable_nodes = 1;
                update = true;
            }

            i = (i + 1) % num_nodes;
        }

        if update {
            c.remove_empty_clusters();
        }

        update
    }
}
