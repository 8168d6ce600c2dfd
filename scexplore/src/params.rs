use crate::cell_cycle::ModuleScoreParams;
use crate::clustering::ClusterParams;
use crate::markers::MarkerFilter;
use crate::nn::NeighborParams;
use crate::panels::DEFAULT_PLOT_PANELS;
use crate::qc::{QcPatterns, QcThresholds};
use crate::sctransform::SctParams;
use anyhow::{bail, Context, Error};
use diff_exp::MarkerParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use umap_rs::{DistanceType, Umap};

/// UMAP settings exposed in the analysis parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapParams {
    /// Number of leading principal components used as input
    pub n_dims: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    /// `cosine` or `euclidean`
    pub metric: String,
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        UmapParams {
            n_dims: 20,
            n_neighbors: 30,
            min_dist: 0.3,
            metric: "cosine".to_string(),
            seed: 42,
        }
    }
}

impl UmapParams {
    pub fn to_umap(&self) -> Result<Umap, Error> {
        let distance_type = match DistanceType::from_name(&self.metric) {
            Some(d) => d,
            None => bail!("unknown UMAP metric '{}'", self.metric),
        };
        Ok(Umap {
            distance_type,
            n_neighbors: self.n_neighbors,
            min_dist: self.min_dist,
            seed: self.seed,
            ..Umap::default()
        })
    }
}

/// Every setting of the analysis. Missing fields in a JSON file take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Features detected in fewer cells are dropped on load
    pub min_cells: u32,
    /// Cells with fewer detected features are dropped on load
    pub min_features: u32,
    pub qc_patterns: QcPatterns,
    pub qc: QcThresholds,
    /// Target library size of `LogNormalize`
    pub scale_factor: f64,
    pub cell_cycle: ModuleScoreParams,
    pub sct: SctParams,
    /// Metadata columns regressed out of the scaled residuals
    pub vars_to_regress: Vec<String>,
    pub n_pcs: usize,
    pub pca_seed: u64,
    pub umap: UmapParams,
    pub neighbors: NeighborParams,
    pub clustering: ClusterParams,
    pub markers: MarkerParams,
    pub marker_filter: MarkerFilter,
    /// Gene panels drawn as dot plots
    pub plot_panels: Vec<String>,
    pub plots: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            min_cells: 0,
            min_features: 0,
            qc_patterns: QcPatterns::default(),
            qc: QcThresholds::default(),
            scale_factor: 10_000.0,
            cell_cycle: ModuleScoreParams::default(),
            sct: SctParams::default(),
            vars_to_regress: vec!["percent.mt".to_string(), "S.Score".to_string(), "G2M.Score".to_string()],
            n_pcs: 50,
            pca_seed: 42,
            umap: UmapParams::default(),
            neighbors: NeighborParams::default(),
            clustering: ClusterParams::default(),
            markers: MarkerParams::default(),
            marker_filter: MarkerFilter::default(),
            plot_panels: DEFAULT_PLOT_PANELS.iter().map(|p| p.to_string()).collect(),
            plots: true,
        }
    }
}

impl AnalysisParams {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<AnalysisParams, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let params: AnalysisParams =
            serde_json::from_str(&text).with_context(|| format!("parsing parameters in {}", path.display()))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject settings no step can run with.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.scale_factor > 0.0) {
            bail!("scale_factor must be positive, got {}", self.scale_factor);
        }
        if self.n_pcs == 0 {
            bail!("n_pcs must be positive");
        }
        if self.umap.n_dims == 0 || self.neighbors.n_dims == 0 {
            bail!("UMAP and neighbor graph need at least one principal component");
        }
        if self.clustering.resolutions.is_empty() {
            bail!("no clustering resolution to test");
        }
        if !self
            .clustering
            .resolutions
            .iter()
            .any(|r| (r - self.clustering.chosen_resolution).abs() < 1e-9)
        {
            bail!(
                "chosen resolution {} is not one of the tested resolutions {:?}",
                self.clustering.chosen_resolution,
                self.clustering.resolutions
            );
        }
        self.umap.to_umap()?;
        Ok(())
    }
}
