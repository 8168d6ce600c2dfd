use crate::{Clustering, Network};

/// Modularity of a clustering, with the resolution parameter applied to the null model.
/// Self-link weight counts as intra-cluster weight, so the value is the same whether it
/// is computed on the original network or on an aggregate of it.
pub fn modularity(resolution: f64, network: &Network, clustering: &Clustering) -> f64 {
    let self_links = network.total_edge_weight_self_links();
    let total = 2.0 * network.total_edge_weight() + self_links;
    if total == 0.0 {
        return 0.0;
    }

    // each undirected edge is seen from both ends
    let mut quality = self_links;
    for i in 0..network.nodes() {
        let ci = clustering.get(i);
        for (j, w) in network.neighbors(i) {
            if clustering.get(j) == ci {
                quality += w;
            }
        }
    }

    let mut cluster_weights = vec![0.0; clustering.num_clusters()];
    for i in 0..network.nodes() {
        cluster_weights[clustering.get(i)] += network.weight(i);
    }

    let scaled_resolution = resolution / total;
    for w in cluster_weights {
        quality -= w * w * scaled_resolution;
    }

    quality / total
}
