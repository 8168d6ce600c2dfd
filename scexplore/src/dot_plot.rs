//! Per-cluster expression summaries of a gene panel.

use anyhow::{bail, Error};
use diff_exp::stat::Statistics;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Scaled average expression is clipped to +/- this value
pub const SCALE_LIMIT: f64 = 2.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DotPlotEntry {
    pub gene: String,
    pub cluster: u32,
    /// Mean of `expm1(data)` over the cells of the cluster
    pub avg_exp: f64,
    /// Percentage of cells of the cluster with non-zero expression
    pub pct_exp: f64,
    /// z-score of `ln(1 + avg_exp)` across clusters, clipped
    pub avg_exp_scaled: f64,
}

/// Summaries for `genes` (name, feature row) on `data` (features x cells, log1p scale).
/// Entries are ordered by gene, then cluster.
pub fn dot_plot_data(
    data: &CsMat<f64>,
    genes: &[(String, usize)],
    clusters: &[u32],
) -> Result<Vec<DotPlotEntry>, Error> {
    if clusters.len() != data.cols() {
        bail!("{} cluster labels given for {} cells", clusters.len(), data.cols());
    }
    let n_clusters = clusters.iter().max().map_or(0, |&m| m as usize + 1);
    let mut sizes = vec![0usize; n_clusters];
    for &c in clusters {
        sizes[c as usize] += 1;
    }

    let csr;
    let data = if data.is_csr() {
        data
    } else {
        csr = data.to_csr();
        &csr
    };

    let mut entries = Vec::with_capacity(genes.len() * n_clusters);
    for (gene, row) in genes {
        if *row >= data.rows() {
            bail!("feature {} ({}) is out of range", row, gene);
        }
        let mut sum = vec![0.0; n_clusters];
        let mut expressed = vec![0usize; n_clusters];
        if let Some(view) = data.outer_view(*row) {
            for (cell, &v) in view.iter() {
                let c = clusters[cell] as usize;
                sum[c] += v.exp_m1();
                expressed[c] += (v > 0.0) as usize;
            }
        }

        let present: Vec<usize> = (0..n_clusters).filter(|&c| sizes[c] > 0).collect();
        let avg: Vec<f64> = present.iter().map(|&c| sum[c] / sizes[c] as f64).collect();
        let log_avg: Vec<f64> = avg.iter().map(|a| a.ln_1p()).collect();
        let mean = log_avg.mean();
        let sd = log_avg.sd(1.0);
        let constant = log_avg.iter().all(|&v| v == log_avg[0]);

        for (k, &c) in present.iter().enumerate() {
            let scaled = if !constant && sd > 0.0 && sd.is_finite() {
                ((log_avg[k] - mean) / sd).clamp(-SCALE_LIMIT, SCALE_LIMIT)
            } else {
                0.0
            };
            entries.push(DotPlotEntry {
                gene: gene.clone(),
                cluster: c as u32,
                avg_exp: avg[k],
                pct_exp: 100.0 * expressed[c] as f64 / sizes[c] as f64,
                avg_exp_scaled: scaled,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use sprs::TriMat;

    #[test]
    fn test_dot_plot_data() {
        // gene 0 expressed in half of cluster 0 only; gene 1 flat
        let clusters = vec![0, 0, 1, 1, 2, 2];
        let mut tri = TriMat::new((2, 6));
        tri.add_triplet(0, 0, 2f64.ln());
        for c in 0..6 {
            tri.add_triplet(1, c, 1.0);
        }
        let data: CsMat<f64> = tri.to_csc();
        let genes = vec![("A".to_string(), 0), ("B".to_string(), 1)];
        let entries = dot_plot_data(&data, &genes, &clusters).unwrap();
        assert_eq!(entries.len(), 6);

        let a0 = &entries[0];
        assert_eq!((a0.gene.as_str(), a0.cluster), ("A", 0));
        assert_abs_diff_eq!(a0.avg_exp, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(a0.pct_exp, 50.0);
        // ln(1.5), 0, 0: z-scores 2/sqrt(3) and -1/sqrt(3)
        assert_abs_diff_eq!(a0.avg_exp_scaled, 2.0 / 3f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(entries[1].avg_exp_scaled, -1.0 / 3f64.sqrt(), epsilon = 1e-12);
        assert_eq!(entries[1].pct_exp, 0.0);

        for e in &entries[3..] {
            assert_eq!(e.gene, "B");
            assert_eq!(e.avg_exp_scaled, 0.0);
            assert_eq!(e.pct_exp, 100.0);
        }
    }

    #[test]
    fn test_clipping() {
        let n = 40;
        let clusters: Vec<u32> = (0..n).map(|c| c as u32).collect();
        let mut tri = TriMat::new((1, n));
        tri.add_triplet(0, 0, 5.0);
        let data: CsMat<f64> = tri.to_csr();
        let entries = dot_plot_data(&data, &[("X".to_string(), 0)], &clusters).unwrap();
        assert_eq!(entries[0].avg_exp_scaled, SCALE_LIMIT);
        assert!(entries[1].avg_exp_scaled < 0.0);

        assert!(dot_plot_data(&data, &[("X".to_string(), 3)], &clusters).is_err());
        assert!(dot_plot_data(&data, &[], &clusters[..3]).is_err());
    }
}
