use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Cell-cycle phase call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    G1,
    S,
    G2M,
    /// S and G2/M scores are exactly equal and positive
    Undecided,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::G1 => "G1",
            Phase::S => "S",
            Phase::G2M => "G2M",
            Phase::Undecided => "Undecided",
        };
        f.write_str(s)
    }
}

/// Cluster assignment of every cell at one resolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolutionClusters {
    pub resolution: f64,
    pub clusters: Vec<u32>,
}

impl ResolutionClusters {
    /// Metadata column name, e.g. `SCT_snn_res.0.5`
    pub fn column_name(&self) -> String {
        resolution_column(self.resolution)
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.iter().max().map_or(0, |&m| m as usize + 1)
    }
}

/// Metadata column name for clusters at `resolution`
pub fn resolution_column(resolution: f64) -> String {
    format!("SCT_snn_res.{}", resolution)
}

/// Per-cell annotations accumulated by the pipeline. Columns filled by later
/// steps are empty until that step has run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    pub barcodes: Vec<String>,
    pub n_count_rna: Vec<f64>,
    pub n_feature_rna: Vec<u32>,
    pub percent_mt: Vec<f64>,
    pub percent_ribo: Vec<f64>,
    pub percent_mrp: Vec<f64>,
    pub s_score: Vec<f64>,
    pub g2m_score: Vec<f64>,
    pub phase: Vec<Phase>,
    pub n_count_sct: Vec<f64>,
    pub n_feature_sct: Vec<u32>,
    pub resolutions: Vec<ResolutionClusters>,
    /// Resolution copied into `seurat_clusters`
    pub chosen_resolution: Option<f64>,
}

impl CellMetadata {
    pub fn num_cells(&self) -> usize {
        self.barcodes.len()
    }

    /// Keep the listed cells, in the listed order.
    pub fn subset(&self, keep: &[usize]) -> CellMetadata {
        fn pick<T: Clone>(v: &[T], keep: &[usize]) -> Vec<T> {
            if v.is_empty() {
                return Vec::new();
            }
            keep.iter().map(|&i| v[i].clone()).collect()
        }
        CellMetadata {
            barcodes: pick(&self.barcodes, keep),
            n_count_rna: pick(&self.n_count_rna, keep),
            n_feature_rna: pick(&self.n_feature_rna, keep),
            percent_mt: pick(&self.percent_mt, keep),
            percent_ribo: pick(&self.percent_ribo, keep),
            percent_mrp: pick(&self.percent_mrp, keep),
            s_score: pick(&self.s_score, keep),
            g2m_score: pick(&self.g2m_score, keep),
            phase: pick(&self.phase, keep),
            n_count_sct: pick(&self.n_count_sct, keep),
            n_feature_sct: pick(&self.n_feature_sct, keep),
            resolutions: self
                .resolutions
                .iter()
                .map(|r| ResolutionClusters {
                    resolution: r.resolution,
                    clusters: pick(&r.clusters, keep),
                })
                .collect(),
            chosen_resolution: self.chosen_resolution,
        }
    }

    /// Clusters at `resolution`, if that resolution was part of the sweep
    pub fn clusters_at(&self, resolution: f64) -> Option<&ResolutionClusters> {
        self.resolutions
            .iter()
            .find(|r| (r.resolution - resolution).abs() < 1e-9)
    }

    /// The `seurat_clusters` column
    pub fn seurat_clusters(&self) -> Option<&[u32]> {
        let r = self.chosen_resolution?;
        self.clusters_at(r).map(|r| r.clusters.as_slice())
    }

    /// Select the resolution used downstream. Fails if it was not part of the sweep.
    pub fn choose_resolution(&mut self, resolution: f64) -> Result<(), Error> {
        if self.clusters_at(resolution).is_none() {
            let tested: Vec<f64> = self.resolutions.iter().map(|r| r.resolution).collect();
            bail!("resolution {} is not one of the tested resolutions {:?}", resolution, tested);
        }
        self.chosen_resolution = Some(resolution);
        Ok(())
    }

    /// Write all filled columns as CSV, one row per cell.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
        let n = self.num_cells();

        let mut columns: Vec<(String, Vec<String>)> = Vec::new();
        let mut add = |name: &str, values: Vec<String>| {
            if values.len() == n {
                columns.push((name.to_string(), values));
            }
        };
        let fmt_f = |v: &[f64]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        let fmt_u = |v: &[u32]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        add("nCount_RNA", fmt_f(&self.n_count_rna));
        add("nFeature_RNA", fmt_u(&self.n_feature_rna));
        add("percent.mt", fmt_f(&self.percent_mt));
        add("percent.ribo", fmt_f(&self.percent_ribo));
        add("percent.mrp", fmt_f(&self.percent_mrp));
        add("S.Score", fmt_f(&self.s_score));
        add("G2M.Score", fmt_f(&self.g2m_score));
        add("Phase", self.phase.iter().map(|p| p.to_string()).collect());
        add("nCount_SCT", fmt_f(&self.n_count_sct));
        add("nFeature_SCT", fmt_u(&self.n_feature_sct));
        for r in &self.resolutions {
            add(&r.column_name(), fmt_u(&r.clusters));
        }
        if let Some(clusters) = self.seurat_clusters() {
            add("seurat_clusters", fmt_u(clusters));
        }

        let mut header = vec!["barcode".to_string()];
        header.extend(columns.iter().map(|(name, _)| name.clone()));
        writer.write_record(&header)?;
        for i in 0..n {
            let mut record = vec![self.barcodes[i].as_str()];
            record.extend(columns.iter().map(|(_, values)| values[i].as_str()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
