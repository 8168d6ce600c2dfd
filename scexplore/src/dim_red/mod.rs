//! Principal component analysis of the scaled residual matrix.
//!
//! The matrix handed to [`run_pca`] is variables x cells, already centered per
//! variable, so the PCA is a plain truncated SVD of its transpose. The SVD itself is
//! randomized (Halko et al.), with small dense factorizations done by nalgebra.

use anyhow::{bail, Error};
use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Randomized SVD method
pub mod rand_svd;

pub use rand_svd::RandSvd;

/// `(U, sigma, V)` of a truncated SVD
pub type SvdResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Principal components of a cells x variables matrix
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    /// Cell coordinates, `U * D`; cells x components
    pub embeddings: Array2<f64>,
    /// Variable loadings, `V`; variables x components
    pub loadings: Array2<f64>,
    /// Standard deviation of each component, `D / sqrt(n_cells - 1)`
    pub stdev: Array1<f64>,
}

impl Pca {
    pub fn num_components(&self) -> usize {
        self.stdev.len()
    }
}

/// Flip components so that the loading with the largest magnitude is positive.
fn fix_signs(u: &mut Array2<f64>, v: &mut Array2<f64>) {
    for (mut ucol, mut vcol) in u.axis_iter_mut(Axis(1)).zip(v.axis_iter_mut(Axis(1))) {
        let largest = vcol
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if largest < 0.0 {
            ucol.mapv_inplace(|x| -x);
            vcol.mapv_inplace(|x| -x);
        }
    }
}

/// PCA of `scale_data` (variables x cells), keeping `n_pcs` components, capped below
/// the smaller matrix dimension.
pub fn run_pca(scale_data: &Array2<f64>, n_pcs: usize, svd: &RandSvd) -> Result<Pca, Error> {
    let (n_vars, n_cells) = scale_data.dim();
    let max_pcs = n_vars.min(n_cells).saturating_sub(1);
    if max_pcs == 0 {
        bail!("cannot run PCA on a {} x {} matrix", n_vars, n_cells);
    }
    let k = if n_pcs > max_pcs {
        warn!("{} components requested, computing {} instead", n_pcs, max_pcs);
        max_pcs
    } else {
        n_pcs
    };

    let tick = Instant::now();
    let (mut u, d, mut v) = svd.run(scale_data.t(), k)?;
    fix_signs(&mut u, &mut v);

    let embeddings = &u * &d.view().insert_axis(Axis(0));
    let stdev = d.mapv(|x| x / ((n_cells - 1) as f64).sqrt());
    info!(
        "PCA: {} components of {} cells x {} variables in {:.2}s",
        k,
        n_cells,
        n_vars,
        tick.elapsed().as_secs_f64()
    );
    Ok(Pca {
        embeddings,
        loadings: v,
        stdev,
    })
}
