//! Marker-gene test of one group of cells against another on log-scale expression.
//!
//! Every feature passing the detection-rate and fold-change pre-filters gets a
//! Wilcoxon rank-sum test; p-values are Bonferroni-adjusted for the total number
//! of features in the matrix, whether or not they were tested.

use crate::dist::adjusted_pvalue_bonferroni;
use crate::wilcoxon::sparse_rank_sum_test;
use anyhow::{bail, Error};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Pre-filters and options for [`find_markers`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerParams {
    /// Minimal fraction of cells expressing the feature in either group
    pub min_pct: f64,
    /// Minimal log2 fold change (absolute value unless `only_pos`)
    pub logfc_threshold: f64,
    /// Report only features higher in the first group
    pub only_pos: bool,
    /// Pseudocount added to the mean before taking log2
    pub pseudocount: f64,
}

impl Default for MarkerParams {
    fn default() -> Self {
        MarkerParams {
            min_pct: 0.1,
            logfc_threshold: 0.25,
            only_pos: true,
            pseudocount: 1.0,
        }
    }
}

/// Test result for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerResult {
    /// Row index of the feature
    pub feature: usize,
    /// Unadjusted p-value
    pub p_val: f64,
    /// `log2(mean(expm1(x1)) + 1) - log2(mean(expm1(x2)) + 1)`
    pub avg_log2fc: f64,
    /// Fraction of first-group cells expressing the feature, rounded to 3 decimals
    pub pct_1: f64,
    /// Fraction of second-group cells expressing the feature, rounded to 3 decimals
    pub pct_2: f64,
    /// Bonferroni-adjusted p-value, capped at 1
    pub p_val_adj: f64,
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Compare the cells with `group[c] == Some(true)` against those with `Some(false)`;
/// cells marked None take part in neither group.
///
/// `data` is features x cells in CSR storage (one compressed row per feature) holding
/// log1p-scale expression. Results are sorted by p-value, then by decreasing fold change.
pub fn find_markers(data: &CsMat<f64>, group: &[Option<bool>], params: &MarkerParams) -> Result<Vec<MarkerResult>, Error> {
    if !data.is_csr() {
        bail!("marker test expects one compressed row per feature (CSR storage)");
    }
    if group.len() != data.cols() {
        bail!("{} group labels given for {} cells", group.len(), data.cols());
    }

    let n1 = group.iter().filter(|g| **g == Some(true)).count();
    let n2 = group.iter().filter(|g| **g == Some(false)).count();
    if n1 == 0 || n2 == 0 {
        bail!("both groups need at least one cell ({} vs {})", n1, n2);
    }
    let n_features = data.rows();

    let mut results: Vec<MarkerResult> = (0..n_features)
        .into_par_iter()
        .filter_map(|feature| {
            let row = data.outer_view(feature)?;

            let mut nz_1 = 0usize;
            let mut nz_2 = 0usize;
            let mut expm1_1 = 0.0;
            let mut expm1_2 = 0.0;
            let mut entries = Vec::with_capacity(row.nnz());
            for (cell, &v) in row.iter() {
                let in_first = match group[cell] {
                    Some(g) => g,
                    None => continue,
                };
                if in_first {
                    expm1_1 += v.exp_m1();
                    nz_1 += (v > 0.0) as usize;
                } else {
                    expm1_2 += v.exp_m1();
                    nz_2 += (v > 0.0) as usize;
                }
                entries.push((v, in_first));
            }

            let pct_1 = round3(nz_1 as f64 / n1 as f64);
            let pct_2 = round3(nz_2 as f64 / n2 as f64);
            if pct_1.max(pct_2) < params.min_pct {
                return None;
            }

            let avg_log2fc = (expm1_1 / n1 as f64 + params.pseudocount).log2()
                - (expm1_2 / n2 as f64 + params.pseudocount).log2();
            let passes_fc = if params.only_pos {
                avg_log2fc >= params.logfc_threshold
            } else {
                avg_log2fc.abs() >= params.logfc_threshold
            };
            if !passes_fc {
                return None;
            }

            let stored_1 = entries.iter().filter(|e| e.1).count();
            let stored_2 = entries.len() - stored_1;
            let test = sparse_rank_sum_test(&mut entries, n1, n2, (n1 - stored_1, n2 - stored_2));

            Some(MarkerResult {
                feature,
                p_val: test.p_value,
                avg_log2fc,
                pct_1,
                pct_2,
                p_val_adj: adjusted_pvalue_bonferroni(test.p_value, n_features),
            })
        })
        .collect();

    if params.only_pos {
        results.retain(|r| r.avg_log2fc > 0.0);
    }

    results.sort_by(|a, b| {
        a.p_val
            .total_cmp(&b.p_val)
            .then(b.avg_log2fc.total_cmp(&a.avg_log2fc))
            .then(a.feature.cmp(&b.feature))
    });
    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wilcoxon::rank_sum_test;
    use assert_approx_eq::assert_approx_eq;
    use sprs::TriMat;

    /// 3 features x 8 cells; cells 0..4 are the first group.
    fn toy() -> CsMat<f64> {
        let dense = [
            // up in group 1
            [2.0, 1.5, 2.2, 1.8, 0.0, 0.0, 0.3, 0.0],
            // flat
            [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            // up in group 2
            [0.0, 0.0, 0.0, 0.2, 1.5, 2.0, 1.7, 2.1],
        ];
        let mut tri = TriMat::new((3, 8));
        for (r, row) in dense.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        tri.to_csr()
    }

    fn groups() -> Vec<Option<bool>> {
        (0..8).map(|c| Some(c < 4)).collect()
    }

    #[test]
    fn test_only_positive_markers() {
        let res = find_markers(&toy(), &groups(), &MarkerParams::default()).unwrap();
        assert_eq!(res.len(), 1);
        let m = &res[0];
        assert_eq!(m.feature, 0);
        assert_eq!(m.pct_1, 1.0);
        assert_eq!(m.pct_2, 0.25);

        let mean1 = [2.0f64, 1.5, 2.2, 1.8].iter().map(|v| v.exp_m1()).sum::<f64>() / 4.0;
        let mean2 = 0.3f64.exp_m1() / 4.0;
        assert_approx_eq!(m.avg_log2fc, (mean1 + 1.0).log2() - (mean2 + 1.0).log2());

        let dense = rank_sum_test(&[2.0, 1.5, 2.2, 1.8], &[0.0, 0.0, 0.3, 0.0]);
        assert_approx_eq!(m.p_val, dense.p_value);
        assert_approx_eq!(m.p_val_adj, (dense.p_value * 3.0).min(1.0));
    }

    #[test]
    fn test_both_directions() {
        let params = MarkerParams {
            only_pos: false,
            ..MarkerParams::default()
        };
        let res = find_markers(&toy(), &groups(), &params).unwrap();
        let features: Vec<usize> = res.iter().map(|r| r.feature).collect();
        assert_eq!(features.len(), 2);
        assert!(features.contains(&0) && features.contains(&2));
        assert!(res.iter().any(|r| r.avg_log2fc < 0.0));
        assert!(res.windows(2).all(|w| w[0].p_val <= w[1].p_val));
    }

    #[test]
    fn test_min_pct_and_exclusion() {
        // ignore cells 6 and 7 entirely
        let mut g = groups();
        g[6] = None;
        g[7] = None;
        let params = MarkerParams {
            min_pct: 0.9,
            ..MarkerParams::default()
        };
        let res = find_markers(&toy(), &g, &params).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].pct_2, 0.0);
    }

    #[test]
    fn test_bad_input() {
        assert!(find_markers(&toy(), &groups()[..4], &MarkerParams::default()).is_err());
        let all_first: Vec<Option<bool>> = vec![Some(true); 8];
        assert!(find_markers(&toy(), &all_first, &MarkerParams::default()).is_err());
        assert!(find_markers(&toy().to_csc(), &groups(), &MarkerParams::default()).is_err());
    }
}
