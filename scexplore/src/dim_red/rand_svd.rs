#![allow(non_snake_case)]

use super::SvdResult;
use anyhow::{format_err, Error};
use nalgebra::DMatrix;
use ndarray::{s, Array1, Array2, ArrayView2};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Settings for randomized SVD
#[derive(Clone, Debug)]
pub struct RandSvd {
    /// Multiple of the requested k to use in randomized projections
    pub l_multiplier: f64,

    /// Number of power iteration to perform
    pub n_iter: usize,

    pub seed: u64,
}

impl RandSvd {
    /// Create a new RandSvd with default settings.
    pub fn new() -> RandSvd {
        RandSvd {
            l_multiplier: 10.0,
            n_iter: 2,
            seed: 42,
        }
    }

    /// Rank `k` SVD of `a`
    pub fn run(&self, a: ArrayView2<f64>, k: usize) -> Result<SvdResult, Error> {
        let l = std::cmp::max(k + 4, ((k as f64) * self.l_multiplier) as usize);
        svd_rand(a, k, l, self.n_iter, self.seed)
    }
}

impl Default for RandSvd {
    fn default() -> Self {
        Self::new()
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Orthonormal basis of the column space of `a` (thin Q of its QR decomposition)
fn orthonormalize(a: Array2<f64>) -> Array2<f64> {
    let q = to_dmatrix(&a).qr().q();
    from_dmatrix(&q)
}

/// SVD of a small dense matrix, singular values in decreasing order
fn small_svd(b: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), Error> {
    let svd = to_dmatrix(b).svd(true, true);
    let u = svd.u.ok_or_else(|| format_err!("SVD did not produce U"))?;
    let v_t = svd.v_t.ok_or_else(|| format_err!("SVD did not produce V^T"))?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));

    let U = Array2::from_shape_fn((u.nrows(), order.len()), |(i, j)| u[(i, order[j])]);
    let sigma = Array1::from_iter(order.iter().map(|&i| svd.singular_values[i]));
    let Vt = Array2::from_shape_fn((order.len(), v_t.ncols()), |(i, j)| v_t[(order[i], j)]);
    Ok((U, sigma, Vt))
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `l` projection
/// dimensions and `n_iter` power iterations. Returns `(U, sigma, V)`.
#[inline(never)]
pub fn svd_rand(
    A: ArrayView2<f64>,
    k: usize, // svd rank
    l: usize,
    n_iter: usize, // power iterations
    seed: u64,
) -> Result<SvdResult, Error> {
    let m = A.nrows();
    let n = A.ncols();

    if m < 2 || n < 2 {
        return Err(format_err!("The input matrix must be at least 2x2."));
    }

    if k == 0 || k > std::cmp::min(m, n) {
        return Err(format_err!("invalid k: {} for a {} x {} matrix", k, m, n));
    }
    let l = l.min(std::cmp::min(m, n));

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    if m >= n {
        let omega = Array2::from_shape_simple_fn((n, l), || unif.sample(&mut rng));
        let mut Q = orthonormalize(A.dot(&omega));

        for _ in 0..n_iter {
            Q = orthonormalize(Q.t().dot(&A).reversed_axes());
            Q = orthonormalize(A.dot(&Q));
        }

        let B = Q.t().dot(&A);
        let (U, sigma, Va) = small_svd(&B)?;
        let U = Q.dot(&U.slice(s![.., ..k]));
        Ok((U, sigma.slice(s![..k]).to_owned(), Va.slice(s![..k, ..]).t().to_owned()))
    } else {
        // n > m
        let omega = Array2::from_shape_simple_fn((l, m), || unif.sample(&mut rng));
        let mut Q = orthonormalize(omega.dot(&A).reversed_axes());

        for _ in 0..n_iter {
            Q = orthonormalize(A.dot(&Q));
            Q = orthonormalize(Q.t().dot(&A).reversed_axes());
        }

        let B = A.dot(&Q);
        let (U, sigma, Va) = small_svd(&B)?;
        let Va = Va.slice(s![..k, ..]).dot(&Q.t());
        Ok((
            U.slice(s![.., ..k]).to_owned(),
            sigma.slice(s![..k]).to_owned(),
            Va.reversed_axes(),
        ))
    }
}
