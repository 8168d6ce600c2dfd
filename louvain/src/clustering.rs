/// Assignment of every node to a single integer cluster label.
/// Labels are kept dense: `0..num_clusters()`, possibly with some labels unused
/// until `remove_empty_clusters` is called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Each node in its own cluster
    pub fn singletons(num_nodes: usize) -> Clustering {
        Clustering {
            labels: (0..num_nodes).collect(),
            num_clusters: num_nodes,
        }
    }

    /// Initialize the clustering with a known set of labels. Unused labels are removed.
    pub fn from_labels(labels: &[usize]) -> Clustering {
        let num_clusters = labels.iter().max().map_or(0, |&m| m + 1);
        let mut r = Clustering {
            labels: labels.to_vec(),
            num_clusters,
        };
        r.remove_empty_clusters();
        r
    }

    /// Label of node `i`
    pub fn get(&self, node: usize) -> usize {
        self.labels[node]
    }

    /// Set the label of node `i`
    pub fn set(&mut self, node: usize, label: usize) {
        self.labels[node] = label;
        if label >= self.num_clusters {
            self.num_clusters = label + 1;
        }
    }

    /// Total number of nodes
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of cluster labels in use (an upper bound until `remove_empty_clusters` is called)
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// All labels, one per node
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of nodes carrying each label
    pub fn nodes_per_cluster(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_clusters];
        for &l in &self.labels {
            counts[l] += 1;
        }
        counts
    }

    /// Reassign node labels, removing unused labels while keeping label order.
    pub fn remove_empty_clusters(&mut self) {
        let mut new_labels = vec![usize::MAX; self.num_clusters];
        let mut next = 0;
        for (old, count) in self.nodes_per_cluster().into_iter().enumerate() {
            if count > 0 {
                new_labels[old] = next;
                next += 1;
            }
        }

        for l in self.labels.iter_mut() {
            *l = new_labels[*l];
        }
        self.num_clusters = next;
    }

    /// Take a clustering of the cluster labels (e.g. from a reduced network) and
    /// relabel each node with the label of its cluster in that higher-order clustering.
    pub fn merge_clusters(&mut self, cluster_clustering: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = cluster_clustering.get(*l);
        }
        self.num_clusters = cluster_clustering.num_clusters();
        self.remove_empty_clusters();
    }

    /// Relabel clusters so that label 0 is the largest cluster, 1 the next largest and so on.
    /// Ties keep their existing relative order.
    pub fn order_by_size(&mut self) {
        let counts = self.nodes_per_cluster();
        let mut order: Vec<usize> = (0..self.num_clusters).filter(|&c| counts[c] > 0).collect();
        order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));

        let mut new_labels = vec![usize::MAX; self.num_clusters];
        for (new, &old) in order.iter().enumerate() {
            new_labels[old] = new;
        }
        for l in self.labels.iter_mut() {
            *l = new_labels[*l];
        }
        self.num_clusters = order.len();
    }
}
