use crate::Q;
use log::{debug, warn};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use sprs::CsMat;

const MAX_ITER: usize = 1000;
const TOL: Q = 1e-7;
const OVERSAMPLE: usize = 4;

/// Spectral layout of a symmetric weighted graph: the eigenvectors belonging to the
/// `dim` smallest non-trivial eigenvalues of the normalized Laplacian
/// `L = I - D^-1/2 W D^-1/2`.
///
/// The smallest eigenvalues of `L` are the largest of `(I + D^-1/2 W D^-1/2) / 2`, whose
/// spectrum lies in `[0, 1]`, so they are found by block power iteration with a
/// Rayleigh-Ritz projection after every step. Returns None if the graph is too small.
pub fn spectral_layout(graph: &CsMat<Q>, dim: usize, seed: u64) -> Option<Array2<Q>> {
    let n = graph.rows();
    let k = dim + 1;
    if n <= k + 1 {
        return None;
    }
    let block = (k + OVERSAMPLE).min(n);

    let inv_sqrt_deg: Vec<Q> = graph
        .outer_iterator()
        .map(|row| {
            let d: Q = row.data().iter().sum();
            if d > 0.0 {
                1.0 / d.sqrt()
            } else {
                0.0
            }
        })
        .collect();

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut x = DMatrix::from_fn(n, block, |_, _| rng.gen_range(-1.0..1.0));
    x = x.qr().q();

    let mut previous: Option<Vec<Q>> = None;
    let mut values = Vec::new();
    for iter in 0..MAX_ITER {
        let y = apply_shifted(graph, &inv_sqrt_deg, &x);
        let q = y.qr().q();

        // Rayleigh-Ritz on the current subspace
        let aq = apply_shifted(graph, &inv_sqrt_deg, &q);
        let h = q.transpose() * &aq;
        let h = (&h + h.transpose()) * 0.5;
        let eig = SymmetricEigen::new(h);

        let mut order: Vec<usize> = (0..block).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let rotation = DMatrix::from_fn(block, block, |r, c| eig.eigenvectors[(r, order[c])]);
        x = q * rotation;
        values = order.iter().map(|&i| eig.eigenvalues[i]).collect::<Vec<Q>>();

        if let Some(prev) = previous.as_ref() {
            let change = values[..k]
                .iter()
                .zip(prev[..k].iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, Q::max);
            if change < TOL {
                debug!("spectral layout converged after {} iterations", iter + 1);
                break;
            }
        }
        previous = Some(values.clone());
    }

    if values.len() > k && (values[k - 1] - values[k]).abs() < TOL {
        warn!("spectral layout: eigenvalues {} and {} are degenerate, layout may be arbitrary", k - 1, k);
    }

    // drop the leading (trivial) eigenvector
    Some(Array2::from_shape_fn((n, dim), |(r, c)| x[(r, c + 1)]))
}

/// `(I + D^-1/2 W D^-1/2) X / 2`
fn apply_shifted(graph: &CsMat<Q>, inv_sqrt_deg: &[Q], x: &DMatrix<Q>) -> DMatrix<Q> {
    let mut out = x.clone();
    for (i, row) in graph.outer_iterator().enumerate() {
        for (j, &w) in row.iter() {
            let s = inv_sqrt_deg[i] * w * inv_sqrt_deg[j];
            for c in 0..x.ncols() {
                out[(i, c)] += s * x[(j, c)];
            }
        }
    }
    out * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    /// Two dense blocks joined by one weak edge
    fn two_blocks(size: usize) -> CsMat<Q> {
        let n = 2 * size;
        let mut tri = TriMat::new((n, n));
        for b in 0..2 {
            for i in 0..size {
                for j in 0..size {
                    if i != j {
                        tri.add_triplet(b * size + i, b * size + j, 1.0);
                    }
                }
            }
        }
        tri.add_triplet(0, size, 0.1);
        tri.add_triplet(size, 0, 0.1);
        tri.to_csr()
    }

    #[test]
    fn test_spectral_separates_blocks() {
        let size = 10;
        let g = two_blocks(size);
        let layout = spectral_layout(&g, 2, 42).unwrap();
        assert_eq!(layout.dim(), (2 * size, 2));

        // the first coordinate is the Fiedler vector: constant sign within each block
        let first: Vec<Q> = layout.column(0).to_vec();
        let sign_a = first[1].signum();
        assert!(first[1..size].iter().all(|v| v.signum() == sign_a));
        assert!(first[size + 1..].iter().all(|v| v.signum() == -sign_a));
    }

    #[test]
    fn test_spectral_too_small() {
        let g = two_blocks(1);
        assert!(spectral_layout(&g, 2, 0).is_none());
    }
}
