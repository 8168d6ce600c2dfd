//! Variance-stabilizing transformation of UMI counts by regularized negative-binomial
//! regression on library size.
//!
//! Each gene is modelled as `y ~ NB(mu, theta)` with `log(mu) = b0 + b1 * log10(umi)`.
//! Parameters are fitted on a sample of genes and cells, smoothed as a function of
//! gene abundance so that similar genes share similar models, then applied to every
//! gene to produce Pearson residuals and depth-corrected counts.

use crate::stats::{bandwidth_scott, bandwidth_silverman, gaussian_density, median};
use anyhow::{bail, format_err, Error};
use log::{debug, info};
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use scan_types::FeatureBarcodeMatrix;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, CsVecView, TriMat};
use std::time::Instant;

/// Count models and dispersion estimates
pub mod nb;
/// Outlier removal and kernel smoothing of model parameters
pub mod regularize;

use nb::{poisson_glm, theta_ml};
use regularize::{is_outlier, kernel_smooth};

/// Settings of the transformation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SctParams {
    /// Genes must be detected in at least this many cells
    pub min_cells: u32,
    /// Genes used to fit the unregularized models
    pub n_genes: Option<usize>,
    /// Cells used to fit the unregularized models
    pub n_cells: Option<usize>,
    pub n_variable_features: usize,
    /// Multiplier of the rule-of-thumb bandwidth used to smooth model parameters
    pub bw_adjust: f64,
    /// Newton iteration limit of the dispersion estimate
    pub theta_limit: usize,
    pub outlier_threshold: f64,
    /// Residuals are clipped to +/- this value; `sqrt(n_cells / 30)` by default
    pub clip: Option<f64>,
    pub seed: u64,
}

impl Default for SctParams {
    fn default() -> Self {
        SctParams {
            min_cells: 5,
            n_genes: Some(2000),
            n_cells: Some(5000),
            n_variable_features: 3000,
            bw_adjust: 3.0,
            theta_limit: 10,
            outlier_threshold: 10.0,
            clip: None,
            seed: 1448145,
        }
    }
}

/// Regularized model of one gene
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneModel {
    /// log10 of the geometric mean of the counts (pseudocount 1)
    pub log_gmean: f64,
    pub theta: f64,
    pub b0: f64,
    pub b1: f64,
}

impl GeneModel {
    #[inline]
    pub fn mu(&self, log_umi: f64) -> f64 {
        (self.b0 + self.b1 * log_umi).exp()
    }

    #[inline]
    pub fn pearson_residual(&self, y: f64, log_umi: f64) -> f64 {
        let mu = self.mu(log_umi);
        (y - mu) / (mu + mu * mu / self.theta).sqrt()
    }
}

/// The transformed assay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SctAssay {
    /// Rows of the input count matrix that were modelled
    pub features: Vec<usize>,
    pub feature_names: Vec<String>,
    pub models: Vec<GeneModel>,
    /// Variance of the clipped Pearson residuals of every modelled gene
    pub residual_variance: Vec<f64>,
    /// Indices into `features`, by decreasing residual variance
    pub variable_features: Vec<usize>,
    /// Residuals of the variable features with the latent variables regressed out,
    /// centered and clipped; variable features x cells
    pub scale_data: Array2<f64>,
    /// Counts regenerated at the median library size; features x cells, CSC
    pub counts: CsMat<u32>,
    /// `ln(1 + counts)`
    pub data: CsMat<f64>,
    /// `log10` of the library size the corrected counts correspond to
    pub reference_log_umi: f64,
    pub clip: f64,
}

impl SctAssay {
    /// Names of the variable features, in order
    pub fn variable_feature_names(&self) -> Vec<&str> {
        self.variable_features
            .iter()
            .map(|&i| self.feature_names[i].as_str())
            .collect()
    }

    /// Total corrected counts of every cell (`nCount_SCT`)
    pub fn counts_per_cell(&self) -> Vec<f64> {
        self.counts
            .outer_iterator()
            .map(|col| col.data().iter().map(|&v| v as f64).sum())
            .collect()
    }

    /// Detected features in every cell (`nFeature_SCT`)
    pub fn features_per_cell(&self) -> Vec<u32> {
        self.counts.outer_iterator().map(|col| col.nnz() as u32).collect()
    }
}

fn dense_row(row: CsVecView<u32>, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    for (i, &v) in row.iter() {
        out[i] = v as f64;
    }
    out
}

/// log10 of the geometric mean with pseudocount 1, the stored counts given sparsely
/// out of `n` values.
fn log10_gmean(row: CsVecView<u32>, n: usize) -> f64 {
    let mean_log: f64 = row.data().iter().map(|&v| (v as f64).ln_1p()).sum::<f64>() / n as f64;
    mean_log.exp_m1().log10()
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Unregularized fit of every step-1 gene on the step-1 cells: `(gene, theta, b0, b1)`
fn fit_step1(
    counts: &CsMat<u32>,
    genes: &[usize],
    cells: &[usize],
    log_umi: &[f64],
    theta_limit: usize,
) -> Vec<(usize, f64, f64, f64)> {
    let n_cells = counts.cols();
    let x: Vec<f64> = cells.iter().map(|&c| log_umi[c]).collect();
    genes
        .par_iter()
        .filter_map(|&g| {
            let row = counts.outer_view(g)?;
            let full = dense_row(row, n_cells);
            let y: Vec<f64> = cells.iter().map(|&c| full[c]).collect();
            let (b0, b1) = poisson_glm(&y, &x)?;
            let mu: Vec<f64> = x.iter().map(|&l| (b0 + b1 * l).exp()).collect();
            let theta = theta_ml(&y, &mu, theta_limit);
            Some((g, theta, b0, b1))
        })
        .collect()
}

/// Ordinary least squares residuals of every row of `y` (variables x cells) against
/// an intercept plus the `latent` covariates (one vector per covariate).
pub fn regress_out(y: &mut Array2<f64>, latent: &[Vec<f64>]) -> Result<(), Error> {
    let n = y.ncols();
    for (i, l) in latent.iter().enumerate() {
        if l.len() != n {
            bail!("latent variable {} has {} values for {} cells", i, l.len(), n);
        }
    }
    let p = latent.len() + 1;
    let x = DMatrix::from_fn(n, p, |i, j| if j == 0 { 1.0 } else { latent[j - 1][i] });
    let xt = x.transpose();
    let xtx_inv = (&xt * &x)
        .pseudo_inverse(1e-10)
        .map_err(|e| format_err!("regression on latent variables failed: {}", e))?;
    let projection = xtx_inv * xt;

    y.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
        let mut beta = vec![0.0; p];
        for (j, b) in beta.iter_mut().enumerate() {
            *b = row.iter().enumerate().map(|(i, v)| projection[(j, i)] * v).sum();
        }
        for (i, v) in row.iter_mut().enumerate() {
            let fitted: f64 = (0..p).map(|j| x[(i, j)] * beta[j]).sum();
            *v -= fitted;
        }
    });
    Ok(())
}

/// Run the transformation on `matrix`, regressing `latent` variables (one vector per
/// variable, one value per cell) out of the scaled residuals.
pub fn sctransform(matrix: &FeatureBarcodeMatrix, latent: &[Vec<f64>], params: &SctParams) -> Result<SctAssay, Error> {
    let tick = Instant::now();
    let n_cells = matrix.num_barcodes();
    if n_cells < 2 {
        bail!("the transformation needs at least 2 cells, got {}", n_cells);
    }
    let umi = matrix.counts_per_barcode();
    if let Some(c) = umi.iter().position(|&u| u == 0) {
        bail!("cell {} has no counts", matrix.barcodes[c]);
    }
    let log_umi: Vec<f64> = umi.iter().map(|&u| (u as f64).log10()).collect();

    let counts = matrix.matrix.to_csr();
    let features: Vec<usize> = matrix
        .barcodes_per_feature()
        .iter()
        .enumerate()
        .filter(|(_, &n)| n >= params.min_cells)
        .map(|(i, _)| i)
        .collect();
    if features.is_empty() {
        bail!("no gene is detected in at least {} cells", params.min_cells);
    }
    info!(
        "variance-stabilizing transformation of {} genes x {} cells",
        features.len(),
        n_cells
    );

    let mut rng = Pcg64Mcg::seed_from_u64(params.seed);

    // step 1: unregularized fits on a sample of cells and genes
    let mut step1_cells: Vec<usize> = match params.n_cells {
        Some(n) if n < n_cells => rand::seq::index::sample(&mut rng, n_cells, n).into_vec(),
        _ => (0..n_cells).collect(),
    };
    step1_cells.sort_unstable();

    let step1_gmean: Vec<f64> = features
        .par_iter()
        .map(|&g| {
            let full = counts.outer_view(g).map(|r| dense_row(r, n_cells)).unwrap_or_default();
            let mean_log = step1_cells.iter().map(|&c| full[c].ln_1p()).sum::<f64>() / step1_cells.len() as f64;
            mean_log.exp_m1().log10()
        })
        .collect();

    let step1_genes: Vec<usize> = match params.n_genes {
        Some(n) if n < features.len() => {
            let candidates: Vec<f64> = step1_gmean.iter().copied().filter(|v| v.is_finite()).collect();
            let bw = bandwidth_scott(&candidates);
            let weights: Vec<f64> = step1_gmean
                .iter()
                .map(|&v| {
                    if v.is_finite() {
                        1.0 / (gaussian_density(&candidates, bw, v) + f64::EPSILON)
                    } else {
                        0.0
                    }
                })
                .collect();
            let n = n.min(weights.iter().filter(|&&w| w > 0.0).count());
            let mut chosen: Vec<usize> = rand::seq::index::sample_weighted(&mut rng, features.len(), |i| weights[i], n)
                .map_err(|e| format_err!("gene sampling failed: {}", e))?
                .into_iter()
                .collect();
            chosen.sort_unstable();
            chosen
        }
        _ => (0..features.len()).collect(),
    };

    let step1_rows: Vec<usize> = step1_genes.iter().map(|&i| features[i]).collect();
    let fits = fit_step1(&counts, &step1_rows, &step1_cells, &log_umi, params.theta_limit);
    debug!(
        "fitted {} of {} genes on {} cells",
        fits.len(),
        step1_rows.len(),
        step1_cells.len()
    );

    // step 2: drop outlying fits, then smooth each parameter over log_gmean
    let row_to_feature: std::collections::HashMap<usize, usize> =
        features.iter().enumerate().map(|(i, &g)| (g, i)).collect();
    let fit_x: Vec<f64> = fits.iter().map(|f| step1_gmean[row_to_feature[&f.0]]).collect();
    let log_theta: Vec<f64> = fits.iter().map(|f| f.1.log10()).collect();
    let b0: Vec<f64> = fits.iter().map(|f| f.2).collect();
    let b1: Vec<f64> = fits.iter().map(|f| f.3).collect();

    let mut keep = vec![true; fits.len()];
    for values in [&log_theta, &b0, &b1] {
        for (k, out) in keep.iter_mut().zip(is_outlier(values, &fit_x, params.outlier_threshold)) {
            *k &= !out;
        }
    }
    for (i, k) in keep.iter_mut().enumerate() {
        *k &= fit_x[i].is_finite() && log_theta[i].is_finite() && b0[i].is_finite() && b1[i].is_finite();
    }
    let pick = |v: &[f64]| -> Vec<f64> { v.iter().zip(&keep).filter(|(_, &k)| k).map(|(&x, _)| x).collect() };
    let (fit_x, log_theta, b0, b1) = (pick(&fit_x), pick(&log_theta), pick(&b0), pick(&b1));
    if fit_x.len() < 2 {
        bail!("only {} genes had a usable model fit", fit_x.len());
    }
    info!("{} of {} step-1 models kept after outlier removal", fit_x.len(), fits.len());

    let bw = bandwidth_silverman(&fit_x) * params.bw_adjust;
    let (x_min, x_max) = fit_x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let models: Vec<GeneModel> = features
        .par_iter()
        .map(|&g| {
            let log_gmean = counts.outer_view(g).map_or(f64::NEG_INFINITY, |r| log10_gmean(r, n_cells));
            let at = if log_gmean.is_finite() { log_gmean.clamp(x_min, x_max) } else { x_min };
            GeneModel {
                log_gmean,
                theta: 10f64.powf(kernel_smooth(&fit_x, &log_theta, bw, at)),
                b0: kernel_smooth(&fit_x, &b0, bw, at),
                b1: kernel_smooth(&fit_x, &b1, bw, at),
            }
        })
        .collect();

    // step 3: residuals of all genes and corrected counts
    let clip = params.clip.unwrap_or_else(|| (n_cells as f64 / 30.0).sqrt());
    let reference_log_umi = {
        let umi_f: Vec<f64> = umi.iter().map(|&u| u as f64).collect();
        median(&umi_f).log10()
    };

    let per_gene: Vec<(f64, Vec<(usize, u32)>)> = features
        .par_iter()
        .zip(models.par_iter())
        .map(|(&g, model)| {
            let y = counts.outer_view(g).map(|r| dense_row(r, n_cells)).unwrap_or_default();
            let mut residuals = Vec::with_capacity(n_cells);
            let mut corrected = Vec::new();
            let mu_ref = model.mu(reference_log_umi);
            let sd_ref = (mu_ref + mu_ref * mu_ref / model.theta).sqrt();
            for (c, &yc) in y.iter().enumerate() {
                let r = model.pearson_residual(yc, log_umi[c]);
                residuals.push(r.clamp(-clip, clip));
                let value = (mu_ref + r * sd_ref).max(0.0).round();
                if value > 0.0 {
                    corrected.push((c, value as u32));
                }
            }
            (variance(&residuals), corrected)
        })
        .collect();

    let residual_variance: Vec<f64> = per_gene.iter().map(|g| g.0).collect();
    let mut tri = TriMat::new((features.len(), n_cells));
    for (i, (_, corrected)) in per_gene.into_iter().enumerate() {
        for (c, v) in corrected {
            tri.add_triplet(i, c, v);
        }
    }
    let corrected_counts: CsMat<u32> = tri.to_csc();
    let data = corrected_counts.map(|&v| (v as f64).ln_1p());

    // variable features and their scaled residuals
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.sort_by(|&a, &b| residual_variance[b].total_cmp(&residual_variance[a]));
    order.truncate(params.n_variable_features.min(features.len()));
    let variable_features = order;

    let mut scale_data = Array2::zeros((variable_features.len(), n_cells));
    scale_data
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(variable_features.par_iter())
        .for_each(|(mut row, &i)| {
            let model = models[i];
            let y = counts
                .outer_view(features[i])
                .map(|r| dense_row(r, n_cells))
                .unwrap_or_default();
            for (c, v) in row.iter_mut().enumerate() {
                *v = model.pearson_residual(y[c], log_umi[c]).clamp(-clip, clip);
            }
        });
    if !latent.is_empty() {
        regress_out(&mut scale_data, latent)?;
    }
    scale_data.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
        let mean = row.sum() / row.len() as f64;
        row.mapv_inplace(|v| (v - mean).clamp(-clip, clip));
    });

    info!(
        "transformation done in {:.1}s: {} variable features, clip {:.2}",
        tick.elapsed().as_secs_f64(),
        variable_features.len(),
        clip
    );

    Ok(SctAssay {
        feature_names: features.iter().map(|&g| matrix.feature_names[g].clone()).collect(),
        features,
        models,
        residual_variance,
        variable_features,
        scale_data,
        counts: corrected_counts,
        data,
        reference_log_umi,
        clip,
    })
}
