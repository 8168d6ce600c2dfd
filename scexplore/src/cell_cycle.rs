//! Cell-cycle phase scoring from S and G2/M marker panels.

use crate::metadata::Phase;
use anyhow::{bail, Error};
use log::{info, warn};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::collections::{BTreeSet, HashMap};

/// S-phase markers (Tirosh et al. 2016)
pub const S_GENES: [&str; 43] = [
    "MCM5", "PCNA", "TYMS", "FEN1", "MCM2", "MCM4", "RRM1", "UNG", "GINS2", "MCM6", "CDCA7", "DTL", "PRIM1", "UHRF1",
    "MLF1IP", "HELLS", "RFC2", "RPA2", "NASP", "RAD51AP1", "GMNN", "WDR76", "SLBP", "CCNE2", "UBR7", "POLD3", "MSH2",
    "ATAD2", "RAD51", "RRM2", "CDC45", "CDC6", "EXO1", "TIPIN", "DSCC1", "BLM", "CASP8AP2", "USP1", "CLSPN", "POLA1",
    "CHAF1B", "BRIP1", "E2F8",
];

/// G2/M-phase markers (Tirosh et al. 2016)
pub const G2M_GENES: [&str; 54] = [
    "HMGB2", "CDK1", "NUSAP1", "UBE2C", "BIRC5", "TPX2", "TOP2A", "NDC80", "CKS2", "NUF2", "CKS1B", "MKI67", "TMPO",
    "CENPF", "TACC3", "FAM64A", "SMC4", "CCNB2", "CKAP2L", "CKAP2", "AURKB", "BUB1", "KIF11", "ANP32E", "TUBB4B", "GTSE1",
    "KIF20B", "HJURP", "CDCA3", "HN1", "CDC20", "TTK", "CDC25C", "KIF2C", "RANGAP1", "NCAPD2", "DLGAP5", "CDCA2", "CDCA8",
    "ECT2", "KIF23", "HMMR", "AURKA", "PSRC1", "ANLN", "LBR", "CKAP5", "CENPE", "CTCF", "NEK2", "G2E3", "GAS2L3", "CBX5",
    "CENPA",
];

/// Settings of the control-gene module score
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleScoreParams {
    /// Number of expression bins used to draw control genes
    pub n_bins: usize,
    /// Control genes drawn per panel gene; None uses the size of the smallest panel
    pub ctrl: Option<usize>,
    pub seed: u64,
}

impl Default for ModuleScoreParams {
    fn default() -> Self {
        ModuleScoreParams {
            n_bins: 24,
            ctrl: None,
            seed: 1,
        }
    }
}

/// Per-cell cell-cycle scores and phase calls
#[derive(Clone, Debug, PartialEq)]
pub struct CellCycleScores {
    pub s_score: Vec<f64>,
    pub g2m_score: Vec<f64>,
    pub phase: Vec<Phase>,
}

/// Mean of every feature (row) of a CSC features x cells matrix
fn row_means(data: &CsMat<f64>) -> Vec<f64> {
    let mut sums = vec![0.0; data.rows()];
    for col in data.outer_iterator() {
        for (row, &v) in col.iter() {
            sums[row] += v;
        }
    }
    let n = data.cols().max(1) as f64;
    sums.into_iter().map(|s| s / n).collect()
}

/// Equal-frequency bin of every feature by average expression.
fn expression_bins(means: &[f64], n_bins: usize) -> Vec<usize> {
    let n = means.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| means[a].total_cmp(&means[b]));
    let mut bins = vec![0; n];
    for (rank, &feature) in order.iter().enumerate() {
        bins[feature] = (rank * n_bins / n).min(n_bins - 1);
    }
    bins
}

/// Average expression of each panel minus the average expression of control genes
/// drawn from the same expression bins as the panel genes.
///
/// `data` is a log-normalized features x cells CSC matrix; `panels` hold row indices.
/// Returns one score vector per panel.
pub fn module_scores(
    data: &CsMat<f64>,
    panels: &[Vec<usize>],
    ctrl: usize,
    params: &ModuleScoreParams,
) -> Result<Vec<Vec<f64>>, Error> {
    if !data.is_csc() {
        bail!("module scores expect one compressed column per cell (CSC storage)");
    }
    if params.n_bins == 0 {
        bail!("module scores need at least one expression bin");
    }
    let means = row_means(data);
    let bins = expression_bins(&means, params.n_bins);
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (feature, &bin) in bins.iter().enumerate() {
        members.entry(bin).or_default().push(feature);
    }

    let mut rng = Pcg64Mcg::seed_from_u64(params.seed);
    let mut scores = Vec::with_capacity(panels.len());
    for panel in panels {
        if panel.is_empty() {
            bail!("cannot score an empty gene panel");
        }
        let mut controls = BTreeSet::new();
        for &gene in panel {
            let pool = &members[&bins[gene]];
            let amount = ctrl.min(pool.len());
            for i in rand::seq::index::sample(&mut rng, pool.len(), amount) {
                controls.insert(pool[i]);
            }
        }

        let mut weights = vec![0.0; data.rows()];
        for &g in panel {
            weights[g] += 1.0 / panel.len() as f64;
        }
        for &g in &controls {
            weights[g] -= 1.0 / controls.len() as f64;
        }
        let score: Vec<f64> = data
            .outer_iterator()
            .map(|col| col.iter().map(|(row, &v)| weights[row] * v).sum())
            .collect();
        scores.push(score);
    }
    Ok(scores)
}

/// Phase from the two scores: G1 when both are negative, otherwise the phase with
/// the larger score.
pub fn assign_phase(s_score: f64, g2m_score: f64) -> Phase {
    if s_score < 0.0 && g2m_score < 0.0 {
        Phase::G1
    } else if s_score > g2m_score {
        Phase::S
    } else if g2m_score > s_score {
        Phase::G2M
    } else {
        Phase::Undecided
    }
}

/// Rows of the listed genes that are present in the matrix. Missing genes are
/// logged and skipped.
pub fn resolve_genes(panel_name: &str, genes: &[&str], feature_index: &HashMap<&str, usize>) -> Vec<usize> {
    let mut rows = Vec::with_capacity(genes.len());
    let mut missing = Vec::new();
    for gene in genes {
        match feature_index.get(gene) {
            Some(&row) => rows.push(row),
            None => missing.push(*gene),
        }
    }
    if !missing.is_empty() {
        warn!(
            "{}: {} of {} genes not found: {}",
            panel_name,
            missing.len(),
            genes.len(),
            missing.join(", ")
        );
    }
    rows
}

/// Score S and G2/M phase markers on log-normalized data and call a phase per cell.
pub fn cell_cycle_scoring(
    data: &CsMat<f64>,
    feature_names: &[String],
    s_genes: &[&str],
    g2m_genes: &[&str],
    params: &ModuleScoreParams,
) -> Result<CellCycleScores, Error> {
    let index: HashMap<&str, usize> = feature_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let s_rows = resolve_genes("S phase markers", s_genes, &index);
    let g2m_rows = resolve_genes("G2/M phase markers", g2m_genes, &index);
    if s_rows.is_empty() || g2m_rows.is_empty() {
        bail!(
            "cell-cycle scoring needs markers of both phases in the matrix ({} S, {} G2/M found)",
            s_rows.len(),
            g2m_rows.len()
        );
    }
    let ctrl = params.ctrl.unwrap_or_else(|| s_rows.len().min(g2m_rows.len()));

    let mut scores = module_scores(data, &[s_rows, g2m_rows], ctrl, params)?;
    let g2m_score = scores.pop().unwrap_or_default();
    let s_score = scores.pop().unwrap_or_default();
    let phase: Vec<Phase> = s_score
        .iter()
        .zip(&g2m_score)
        .map(|(&s, &g)| assign_phase(s, g))
        .collect();

    let count = |p: Phase| phase.iter().filter(|&&x| x == p).count();
    info!(
        "cell-cycle phases: {} G1, {} S, {} G2M, {} undecided",
        count(Phase::G1),
        count(Phase::S),
        count(Phase::G2M),
        count(Phase::Undecided)
    );
    Ok(CellCycleScores {
        s_score,
        g2m_score,
        phase,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use sprs::TriMat;

    #[test]
    fn test_assign_phase() {
        assert_eq!(assign_phase(-0.1, -0.2), Phase::G1);
        assert_eq!(assign_phase(0.3, -0.2), Phase::S);
        assert_eq!(assign_phase(-0.3, 0.0), Phase::G2M);
        assert_eq!(assign_phase(0.2, 0.5), Phase::G2M);
        assert_eq!(assign_phase(0.2, 0.2), Phase::Undecided);
    }

    #[test]
    fn test_expression_bins() {
        let means = [5.0, 1.0, 3.0, 2.0, 4.0, 0.0];
        assert_eq!(expression_bins(&means, 3), vec![2, 0, 1, 1, 2, 0]);
    }

    /// 2400 constant background genes, three S markers high in cells 0..5,
    /// three G2/M markers high in cells 5..10 and nothing in cells 10..15.
    fn synthetic() -> (CsMat<f64>, Vec<String>) {
        let n_background = 2400;
        let n_cells = 15;
        let mut names: Vec<String> = (0..n_background).map(|j| format!("BG{j}")).collect();
        let mut tri = TriMat::new((n_background + 6, n_cells));
        for j in 0..n_background {
            let v = (j + 1) as f64 * 2.0 / n_background as f64;
            for c in 0..n_cells {
                tri.add_triplet(j, c, v);
            }
        }
        for (k, gene) in ["MCM5", "PCNA", "TYMS", "CDK1", "TOP2A", "MKI67"].iter().enumerate() {
            names.push(gene.to_string());
            let cells = if k < 3 { 0..5 } else { 5..10 };
            for c in cells {
                tri.add_triplet(n_background + k, c, 3.0);
            }
        }
        (tri.to_csc(), names)
    }

    #[test]
    fn test_cell_cycle_scoring() {
        let (data, names) = synthetic();
        let scores = cell_cycle_scoring(&data, &names, &S_GENES, &G2M_GENES, &ModuleScoreParams::default()).unwrap();
        for c in 0..5 {
            assert_eq!(scores.phase[c], Phase::S);
        }
        for c in 5..10 {
            assert_eq!(scores.phase[c], Phase::G2M);
        }
        for c in 10..15 {
            assert_eq!(scores.phase[c], Phase::G1);
        }

        let again = cell_cycle_scoring(&data, &names, &S_GENES, &G2M_GENES, &ModuleScoreParams::default()).unwrap();
        assert_eq!(scores, again);
    }

    #[test]
    fn test_panel_score_without_controls() {
        let (data, names) = synthetic();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let s = resolve_genes("S", &["MCM5", "PCNA", "NOT_A_GENE"], &index);
        assert_eq!(s.len(), 2);
        let scores = module_scores(&data, &[s], 0, &ModuleScoreParams::default()).unwrap();
        assert_approx_eq!(scores[0][0], 3.0);
        assert_approx_eq!(scores[0][12], 0.0);
    }

    #[test]
    fn test_missing_markers() {
        let (data, mut names) = synthetic();
        for n in names.iter_mut().skip(2403) {
            *n = format!("{n}_renamed");
        }
        assert!(cell_cycle_scoring(&data, &names, &S_GENES, &G2M_GENES, &ModuleScoreParams::default()).is_err());
    }
}
