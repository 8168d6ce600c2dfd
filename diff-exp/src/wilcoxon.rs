//! Wilcoxon rank-sum (Mann-Whitney U) test with the normal approximation,
//! tie correction and continuity correction.

use crate::dist::two_sided_normal_pvalue;

/// Outcome of a rank-sum test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSumResult {
    /// Mann-Whitney U of the first group: rank sum minus `n1 (n1 + 1) / 2`
    pub u: f64,
    /// Continuity-corrected z statistic
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Rank-sum test of two dense samples.
pub fn rank_sum_test(x: &[f64], y: &[f64]) -> RankSumResult {
    let mut entries: Vec<(f64, bool)> = x.iter().map(|&v| (v, true)).chain(y.iter().map(|&v| (v, false))).collect();
    sparse_rank_sum_test(&mut entries, x.len(), y.len(), (0, 0))
}

/// Rank-sum test where only some observations are listed explicitly.
///
/// `entries` holds `(value, in_first_group)` for the listed observations and is
/// reordered in place. `implicit_zeros` gives how many further observations of
/// each group have the value 0, as for the unstored entries of a sparse row.
/// `n1` and `n2` are the total group sizes.
pub fn sparse_rank_sum_test(
    entries: &mut [(f64, bool)],
    n1: usize,
    n2: usize,
    implicit_zeros: (usize, usize),
) -> RankSumResult {
    let n = (n1 + n2) as f64;
    if n1 == 0 || n2 == 0 {
        return RankSumResult {
            u: 0.0,
            z: 0.0,
            p_value: 1.0,
        };
    }

    entries.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_1 = 0.0;
    let mut tie_sum = 0.0;
    let mut next_rank = 1.0;
    let mut zeros_pending = implicit_zeros.0 + implicit_zeros.1 > 0;

    let mut add_group = |count: usize, count_1: usize| {
        let t = count as f64;
        let mean_rank = next_rank + (t - 1.0) / 2.0;
        rank_sum_1 += mean_rank * count_1 as f64;
        tie_sum += t * t * t - t;
        next_rank += t;
    };

    let mut i = 0;
    while i < entries.len() {
        let value = entries[i].0;
        let mut j = i;
        let mut count_1 = 0;
        while j < entries.len() && entries[j].0 == value {
            if entries[j].1 {
                count_1 += 1;
            }
            j += 1;
        }
        let mut count = j - i;

        if zeros_pending && value >= 0.0 {
            if value == 0.0 {
                // explicit zeros tie with the implicit ones
                count += implicit_zeros.0 + implicit_zeros.1;
                count_1 += implicit_zeros.0;
            } else {
                add_group(implicit_zeros.0 + implicit_zeros.1, implicit_zeros.0);
            }
            zeros_pending = false;
        }

        add_group(count, count_1);
        i = j;
    }
    if zeros_pending {
        add_group(implicit_zeros.0 + implicit_zeros.1, implicit_zeros.0);
    }

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let u = rank_sum_1 - n1f * (n1f + 1.0) / 2.0;
    let centered = u - n1f * n2f / 2.0;
    let sigma = ((n1f * n2f / 12.0) * ((n + 1.0) - tie_sum / (n * (n - 1.0)))).sqrt();

    if !(sigma > 0.0) {
        // every observation is tied
        return RankSumResult {
            u,
            z: 0.0,
            p_value: 1.0,
        };
    }

    let correction = if centered == 0.0 { 0.0 } else { 0.5 * centered.signum() };
    let z = (centered - correction) / sigma;
    RankSumResult {
        u,
        z,
        p_value: two_sided_normal_pvalue(z),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_no_ties() {
        // R: wilcox.test(c(1.1, 2.2, 3.3, 4.4), c(0.5, 0.6, 0.7), exact = FALSE)
        //   W = 12, p-value = 0.05183
        let r = rank_sum_test(&[1.1, 2.2, 3.3, 4.4], &[0.5, 0.6, 0.7]);
        assert_eq!(r.u, 12.0);
        assert_approx_eq!(r.p_value, 0.051830, 1e-5);
    }

    #[test]
    fn test_ties() {
        // R: wilcox.test(c(0, 0, 1, 2, 2), c(0, 1, 1, 0, 0, 0), exact = FALSE)
        //   W = 21, p-value = 0.2669
        let r = rank_sum_test(&[0.0, 0.0, 1.0, 2.0, 2.0], &[0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(r.u, 21.0);
        let n1: f64 = 5.0;
        let n2 = 6.0;
        let n = 11.0;
        // tie groups: six zeros, three ones, two twos
        let ties = (216.0 - 6.0) + (27.0 - 3.0) + (8.0 - 2.0);
        let sigma = ((n1 * n2 / 12.0) * ((n + 1.0) - ties / (n * (n - 1.0)))).sqrt();
        let z = (21.0 - 15.0 - 0.5) / sigma;
        assert_approx_eq!(r.z, z, 1e-12);
        assert_approx_eq!(r.p_value, 0.266939, 1e-5);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let x = [0.0, 0.0, 1.5, 0.0, 2.5, 0.3];
        let y = [0.0, 0.7, 0.0, 0.0, 0.0, 0.0, 0.3];
        let dense = rank_sum_test(&x, &y);

        let mut entries = vec![(1.5, true), (2.5, true), (0.3, true), (0.7, false), (0.3, false)];
        let sparse = sparse_rank_sum_test(&mut entries, x.len(), y.len(), (3, 5));
        assert_approx_eq!(dense.u, sparse.u, 1e-12);
        assert_approx_eq!(dense.p_value, sparse.p_value, 1e-12);

        // an explicit zero ties with the implicit ones
        let mut entries = vec![(1.5, true), (2.5, true), (0.3, true), (0.0, true), (0.7, false), (0.3, false)];
        let sparse = sparse_rank_sum_test(&mut entries, x.len(), y.len(), (2, 5));
        assert_approx_eq!(dense.u, sparse.u, 1e-12);
    }

    #[test]
    fn test_degenerate() {
        let r = rank_sum_test(&[1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert_eq!(r.p_value, 1.0);
        let r = rank_sum_test(&[], &[1.0]);
        assert_eq!(r.p_value, 1.0);
    }
}
