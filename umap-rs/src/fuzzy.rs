use crate::Q;
use ndarray::{Array2, ArrayView1};
use sprs::{CsMat, TriMat};

const NITER: usize = 64;
const SMOOTH_K_TOLERANCE: Q = 1e-5;
const MIN_K_DIST_SCALE: Q = 1e-3;

/// Build the fuzzy simplicial set (a symmetric weighted graph) of a kNN result.
///
/// Each point gets a local fuzzy set: membership `exp(-(d - rho) / sigma)`, where `rho` is
/// the distance to the nearest neighbor (interpolated by `local_connectivity`) and `sigma`
/// is chosen so the memberships sum to `log2(k)`. The local sets are then combined with
/// a mix of fuzzy union and fuzzy intersection, weighted by `set_op_mix_ratio`.
///
/// `knn_indices` must list the point itself in column 0, as returned by
/// [`nearest_neighbors`](crate::knn::nearest_neighbors).
pub fn fuzzy_simplicial_set(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<Q>,
    local_connectivity: Q,
    set_op_mix_ratio: Q,
) -> CsMat<Q> {
    let n_points = knn_indices.nrows();
    let (sigmas, rhos) = smooth_knn_distances(knn_distances, local_connectivity);
    let (rows, cols, values) = compute_membership_strengths(knn_indices, knn_distances, &sigmas, &rhos);

    let p = TriMat::from_triplets((n_points, n_points), rows, cols, values).to_csr::<usize>();
    let pt = p.transpose_view().to_csr();

    // elementwise: mix * (P + P^T - P o P^T) + (1 - mix) * (P o P^T)
    let prod = sprs::binop::mul_mat_same_storage(&p, &pt);
    let union = &(&p + &pt) - &prod;
    let mut result = &(&union * set_op_mix_ratio) + &(&prod * (1.0 - set_op_mix_ratio));
    result.map_inplace(|&v| v.max(0.0));
    log::debug!("fuzzy simplicial set: {} points, {} non-zeros", n_points, result.nnz());
    result
}

/// Per-point `sigma` and `rho` of the local fuzzy sets
fn smooth_knn_distances(knn_distances: &Array2<Q>, local_connectivity: Q) -> (Vec<Q>, Vec<Q>) {
    let (n_points, k) = knn_distances.dim();
    let mut rhos = vec![0.0; n_points];
    let mut sigmas = vec![0.0; n_points];

    let mean_all = if knn_distances.is_empty() {
        0.0
    } else {
        knn_distances.iter().filter(|d| d.is_finite()).sum::<Q>() / knn_distances.len() as Q
    };

    for i in 0..n_points {
        let row = knn_distances.row(i);
        let non_zero: Vec<Q> = row.iter().copied().filter(|&d| d > 0.0 && d.is_finite()).collect();

        if non_zero.len() >= local_connectivity as usize {
            let index = local_connectivity.floor() as usize;
            let interpolation = local_connectivity - index as Q;
            if index > 0 {
                rhos[i] = non_zero[index - 1];
                if interpolation > SMOOTH_K_TOLERANCE && index < non_zero.len() {
                    rhos[i] += interpolation * (non_zero[index] - non_zero[index - 1]);
                }
            } else if !non_zero.is_empty() {
                rhos[i] = interpolation * non_zero[0];
            }
        } else if !non_zero.is_empty() {
            rhos[i] = non_zero.iter().fold(Q::MIN, |a, &b| a.max(b));
        }

        sigmas[i] = smooth_knn_dist(row, rhos[i], k);

        // keep sigma away from zero relative to the typical neighbor distance
        let floor = if rhos[i] > 0.0 {
            MIN_K_DIST_SCALE * row.iter().filter(|d| d.is_finite()).sum::<Q>() / k as Q
        } else {
            MIN_K_DIST_SCALE * mean_all
        };
        if sigmas[i] < floor {
            sigmas[i] = floor;
        }
    }
    (sigmas, rhos)
}

/// Binary search for the `sigma` of one point. Column 0 (the point itself) is skipped.
fn smooth_knn_dist(distances: ArrayView1<Q>, rho: Q, k: usize) -> Q {
    let target = (k as Q).log2();
    let mut lo = 0.0;
    let mut mid = 1.0;
    let mut hi = Q::INFINITY;

    for _ in 0..NITER {
        let psum: Q = distances
            .iter()
            .skip(1)
            .filter(|d| d.is_finite())
            .map(|&v| {
                let d = v - rho;
                if d > 0.0 {
                    (-d / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }
    mid
}

/// Membership strength of each (point, neighbor) pair, as (rows, cols, values) triplets.
/// Row is the point and column the neighbor; self pairs are skipped.
fn compute_membership_strengths(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<Q>,
    sigmas: &[Q],
    rhos: &[Q],
) -> (Vec<usize>, Vec<usize>, Vec<Q>) {
    let (n_points, n_neighbors) = knn_indices.dim();
    let mut rows = Vec::with_capacity(n_points * n_neighbors);
    let mut cols = Vec::with_capacity(n_points * n_neighbors);
    let mut values = Vec::with_capacity(n_points * n_neighbors);

    for i in 0..n_points {
        for j in 0..n_neighbors {
            let nb = knn_indices[[i, j]];
            if nb == usize::MAX || nb == i {
                continue;
            }
            let d = knn_distances[[i, j]];
            let val = if d - rhos[i] <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-((d - rhos[i]) / sigmas[i])).exp()
            };
            rows.push(i);
            cols.push(nb);
            values.push(val);
        }
    }

    (rows, cols, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_smooth_knn_dist() {
        let dists = arr1(&[0., 1., 2., 3., 4., 5.]);
        let rho = 1.0;
        let sigma = smooth_knn_dist(dists.view(), rho, 6);
        let psum: Q = dists
            .iter()
            .skip(1)
            .map(|&v| if v - rho > 0.0 { (-(v - rho) / sigma).exp() } else { 1.0 })
            .sum();
        assert!((psum - 6f64.log2()).abs() < 1e-4);
    }

    #[test]
    fn test_rhos() {
        let knn_distances = arr2(&[[0., 1., 2., 3.], [0., 2., 4., 5.], [0., 0., 0., 0.]]);
        let (sigmas, rhos) = smooth_knn_distances(&knn_distances, 1.0);
        assert_eq!(rhos, vec![1.0, 2.0, 0.0]);
        assert!(sigmas.iter().all(|&s| s > 0.0));

        let (_, rhos) = smooth_knn_distances(&knn_distances, 1.5);
        assert_eq!(rhos, vec![1.5, 3.0, 0.0]);
    }

    #[test]
    fn test_membership_strengths() {
        let knns = arr2(&[[0, 1, 2], [1, 0, 2]]);
        let dists = arr2(&[[0., 1., 3.], [0., 2., 3.]]);
        let (rows, cols, vals) = compute_membership_strengths(&knns, &dists, &[1.0, 1.0], &[1.0, 2.0]);
        assert_eq!(rows, vec![0, 0, 1, 1]);
        assert_eq!(cols, vec![1, 2, 0, 2]);
        assert_eq!(vals[0], 1.0);
        assert!((vals[1] - (-2.0f64).exp()).abs() < 1e-12);
        assert_eq!(vals[2], 1.0);
        assert!((vals[3] - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_fuzzy_set_symmetric() {
        let knns = arr2(&[[0, 1, 2], [1, 0, 2], [2, 1, 0]]);
        let dists = arr2(&[[0., 1.0, 2.0], [0., 1.0, 1.5], [0., 1.5, 2.0]]);
        let g = fuzzy_simplicial_set(&knns, &dists, 1.0, 1.0);
        assert_eq!(g.shape(), (3, 3));
        for (&v, (r, c)) in g.iter() {
            assert!(r != c);
            assert!(v > 0.0 && v <= 1.0);
            let t = *g.get(c, r).unwrap();
            assert!((t - v).abs() < 1e-12);
        }
    }
}
