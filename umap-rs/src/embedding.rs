use crate::Q;
use rand::Rng;
use sprs::CsMat;

/// Edges of the fuzzy graph that will be sampled during optimization
pub struct EdgeList {
    /// Source point of each edge
    pub head: Vec<usize>,
    /// Target point of each edge
    pub tail: Vec<usize>,
    /// Number of epochs between two samples of each edge
    pub epochs_per_sample: Vec<Q>,
}

impl EdgeList {
    /// Number of edges
    pub fn len(&self) -> usize {
        self.head.len()
    }

    /// True if there are no edges to sample
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }
}

/// Drop graph edges too weak to ever be sampled in `n_epochs` and list the rest in a random order.
/// Both directions of every symmetric edge are kept.
pub fn make_edge_list(graph: &CsMat<Q>, n_epochs: usize, random: &mut impl Rng) -> EdgeList {
    let graph_max = graph.data().iter().fold(0.0, |acc: Q, &v| acc.max(v));
    let threshold = graph_max / n_epochs as Q;

    let mut head = Vec::with_capacity(graph.nnz());
    let mut tail = Vec::with_capacity(graph.nnz());
    let mut weights = Vec::with_capacity(graph.nnz());
    for (&value, (row, col)) in graph.iter() {
        if value > 0.0 && value >= threshold {
            head.push(row);
            tail.push(col);
            weights.push(value);
        }
    }

    // Fisher-Yates on the three lists together
    let mut n = head.len();
    while n > 1 {
        n -= 1;
        let k = random.gen_range(0..n + 1);
        head.swap(k, n);
        tail.swap(k, n);
        weights.swap(k, n);
    }

    let epochs_per_sample = make_epochs_per_sample(&weights, n_epochs as Q);
    EdgeList {
        head,
        tail,
        epochs_per_sample,
    }
}

/// The strongest edge is sampled every epoch; weaker edges proportionally less often.
fn make_epochs_per_sample(weights: &[Q], n_epochs: Q) -> Vec<Q> {
    let max = weights.iter().fold(Q::MIN, |a, &b| a.max(b));
    weights
        .iter()
        .map(|&w| {
            let n = (w / max) * n_epochs;
            if n > 0.0 {
                n_epochs / n
            } else {
                -1.0
            }
        })
        .collect()
}

/// Rescale coordinates so the largest absolute value is `max_coord`, then add a little
/// Gaussian-like jitter so that coincident points can separate.
pub fn scale_and_jitter(coords: &mut ndarray::Array2<Q>, max_coord: Q, jitter: Q, random: &mut impl Rng) {
    let max_abs = coords.iter().fold(0.0, |acc: Q, &v| acc.max(v.abs()));
    if max_abs > 0.0 {
        let scale = max_coord / max_abs;
        coords.mapv_inplace(|v| v * scale);
    }
    // sum of uniforms approximates a normal draw with sd `jitter`
    coords.mapv_inplace(|v| {
        let u: Q = (0..12).map(|_| random.gen::<Q>()).sum::<Q>() - 6.0;
        v + u * jitter
    });
}

/// Uniform random coordinates in `[-scale, scale)`
pub fn random_layout(n_points: usize, dim: usize, scale: Q, random: &mut impl Rng) -> ndarray::Array2<Q> {
    ndarray::Array2::from_shape_fn((n_points, dim), |_| random.gen_range(-scale..scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use sprs::TriMat;

    #[test]
    fn test_epochs_per_sample() {
        let e = make_epochs_per_sample(&[1.0, 0.5, 0.25], 200.0);
        assert_eq!(e, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_edge_list() {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        tri.add_triplet(1, 2, 0.5);
        tri.add_triplet(2, 1, 0.5);
        tri.add_triplet(0, 2, 0.001);
        tri.add_triplet(2, 0, 0.001);
        let g: CsMat<Q> = tri.to_csr();
        let mut rng = Pcg64::seed_from_u64(0);
        let edges = make_edge_list(&g, 200, &mut rng);

        // the 0-2 edge is below max / n_epochs
        assert_eq!(edges.len(), 4);
        let mut pairs: Vec<(usize, usize)> = edges.head.iter().copied().zip(edges.tail.iter().copied()).collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 1), (1, 0), (1, 2), (2, 1)]);
        for i in 0..edges.len() {
            let expected = if edges.head[i] + edges.tail[i] == 1 { 1.0 } else { 2.0 };
            assert_eq!(edges.epochs_per_sample[i], expected);
        }
    }

    #[test]
    fn test_scale() {
        let mut rng = Pcg64::seed_from_u64(1);
        let mut c = ndarray::arr2(&[[0.5, -2.0], [1.0, 0.0]]);
        scale_and_jitter(&mut c, 10.0, 0.0, &mut rng);
        assert_eq!(c, ndarray::arr2(&[[2.5, -10.0], [5.0, 0.0]]));
    }
}
