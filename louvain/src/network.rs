use crate::Clustering;
use std::collections::HashMap;

/// Weighted, undirected network stored as symmetric adjacency lists in CSR layout.
/// Every edge appears in the adjacency list of both endpoints. Self links are not
/// stored as edges; their total weight is tracked separately so that aggregated
/// networks still account for the edge weight that ended up inside a cluster.
#[derive(Clone, Debug, Default)]
pub struct Network {
    node_weights: Vec<f64>,
    first_neighbor: Vec<usize>,
    neighbors: Vec<usize>,
    edge_weights: Vec<f64>,
    total_edge_weight_self_links: f64,
}

impl Network {
    /// Build a network from a list of undirected edges `(i, j, weight)`. Each edge
    /// should be listed once; repeated pairs have their weights summed. Edges with
    /// `i == j` count towards the self-link weight. Node weights are set to the
    /// node strength (the sum of the weights of the edges incident to the node),
    /// which is what modularity uses.
    pub fn from_edges<I>(n_nodes: usize, edges: I) -> Network
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_nodes];
        let mut self_links = 0.0;
        for (i, j, w) in edges {
            assert!(i < n_nodes && j < n_nodes, "edge ({i}, {j}) out of range for {n_nodes} nodes");
            if i == j {
                self_links += w;
            } else {
                adjacency[i].push((j, w));
                adjacency[j].push((i, w));
            }
        }

        let mut net = Network::from_adjacency(adjacency, None);
        net.total_edge_weight_self_links = self_links;
        net
    }

    /// Build a network from per-node adjacency lists. Lists are sorted and duplicate
    /// neighbors merged. If `node_weights` is None, node strengths are used.
    fn from_adjacency(mut adjacency: Vec<Vec<(usize, f64)>>, node_weights: Option<Vec<f64>>) -> Network {
        let n_nodes = adjacency.len();
        let mut first_neighbor = Vec::with_capacity(n_nodes + 1);
        let mut neighbors = Vec::new();
        let mut edge_weights = Vec::new();
        first_neighbor.push(0);

        for adj in adjacency.iter_mut() {
            adj.sort_by_key(|&(j, _)| j);
            let start = neighbors.len();
            for &(j, w) in adj.iter() {
                if neighbors.len() > start && neighbors.last() == Some(&j) {
                    if let Some(total) = edge_weights.last_mut() {
                        *total += w;
                    }
                } else {
                    neighbors.push(j);
                    edge_weights.push(w);
                }
            }
            first_neighbor.push(neighbors.len());
        }

        let node_weights = node_weights.unwrap_or_else(|| {
            (0..n_nodes)
                .map(|i| edge_weights[first_neighbor[i]..first_neighbor[i + 1]].iter().sum())
                .collect()
        });

        Network {
            node_weights,
            first_neighbor,
            neighbors,
            edge_weights,
            total_edge_weight_self_links: 0.0,
        }
    }

    /// Number of nodes in the network
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Number of undirected edges, not counting self links
    pub fn edges(&self) -> usize {
        self.neighbors.len() / 2
    }

    /// Weight of `node`
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Iterator over pairs of (adjacent node id, edge weight) for all neighbors of `node`.
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.first_neighbor[node]..self.first_neighbor[node + 1];
        self.neighbors[range.clone()]
            .iter()
            .copied()
            .zip(self.edge_weights[range].iter().copied())
    }

    /// Total weight of all nodes
    pub fn total_node_weight(&self) -> f64 {
        self.node_weights.iter().sum()
    }

    /// Total weight of all edges, each undirected edge counted once. Self links excluded.
    pub fn total_edge_weight(&self) -> f64 {
        self.edge_weights.iter().sum::<f64>() / 2.0
    }

    /// Total weight of the self links
    pub fn total_edge_weight_self_links(&self) -> f64 {
        self.total_edge_weight_self_links
    }

    /// Creates a reduced (or aggregate) network based on a clustering.
    /// Each node in the reduced network corresponds to a cluster of nodes in
    /// the original network. The weight of a node in the reduced network equals
    /// the sum of the weights of the nodes in the corresponding cluster. Edges
    /// between two clusters are merged into one edge carrying their summed weight,
    /// and edges inside a cluster become self-link weight.
    pub fn create_reduced_network(&self, clustering: &Clustering) -> Network {
        let n_clusters = clustering.num_clusters();
        let mut cluster_weights = vec![0.0; n_clusters];
        let mut self_links = self.total_edge_weight_self_links;
        let mut edge_memo: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n_clusters];

        for i in 0..self.nodes() {
            let ci = clustering.get(i);
            cluster_weights[ci] += self.weight(i);
            for (j, w) in self.neighbors(i) {
                let cj = clustering.get(j);
                if ci == cj {
                    // each intra-cluster edge is visited from both ends
                    self_links += w / 2.0;
                } else {
                    *edge_memo[ci].entry(cj).or_insert(0.0) += w;
                }
            }
        }

        let adjacency = edge_memo.into_iter().map(|m| m.into_iter().collect()).collect();
        let mut reduced = Network::from_adjacency(adjacency, Some(cluster_weights));
        reduced.total_edge_weight_self_links = self_links;
        reduced
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_edges() {
        let n = Network::from_edges(4, vec![(0, 1, 1.0), (1, 2, 2.0), (1, 0, 0.5), (3, 3, 4.0)]);
        assert_eq!(n.nodes(), 4);
        assert_eq!(n.edges(), 2);
        assert_eq!(n.weight(0), 1.5);
        assert_eq!(n.weight(1), 3.5);
        assert_eq!(n.weight(2), 2.0);
        assert_eq!(n.weight(3), 0.0);
        assert_eq!(n.total_edge_weight(), 3.5);
        assert_eq!(n.total_edge_weight_self_links(), 4.0);
        assert_eq!(n.neighbors(1).collect::<Vec<_>>(), vec![(0, 1.5), (2, 2.0)]);
    }

    #[test]
    fn test_reduced_network() {
        // two triangles joined by a single edge
        let n = Network::from_edges(
            6,
            vec![(0, 1, 1.0), (1, 2, 1.0), (0, 2, 1.0), (3, 4, 1.0), (4, 5, 1.0), (3, 5, 1.0), (2, 3, 0.5)],
        );
        let c = Clustering::from_labels(&[0, 0, 0, 1, 1, 1]);
        let r = n.create_reduced_network(&c);
        assert_eq!(r.nodes(), 2);
        assert_eq!(r.edges(), 1);
        assert_eq!(r.weight(0), 6.5);
        assert_eq!(r.weight(1), 6.5);
        assert_eq!(r.total_edge_weight(), 0.5);
        assert_eq!(r.total_edge_weight_self_links(), 6.0);
        assert_eq!(r.total_node_weight(), n.total_node_weight());
    }
}
