//! Per-cell quality metrics and threshold filtering

use crate::metadata::CellMetadata;
use anyhow::{Context, Error};
use log::info;
use regex::Regex;
use scan_types::FeatureBarcodeMatrix;
use serde::{Deserialize, Serialize};

/// Feature-name patterns for the percentage annotations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcPatterns {
    pub mito: String,
    pub ribo: String,
    pub mito_ribo: String,
}

impl Default for QcPatterns {
    fn default() -> Self {
        QcPatterns {
            mito: "^MT-".to_string(),
            ribo: "^RP[SL]".to_string(),
            mito_ribo: "^MRP[SL]".to_string(),
        }
    }
}

/// Cells are kept when `min_features < nFeature_RNA < max_features` and
/// `percent.mt < max_percent_mt`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcThresholds {
    pub min_features: u32,
    pub max_features: u32,
    pub max_percent_mt: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        QcThresholds {
            min_features: 1500,
            max_features: 7000,
            max_percent_mt: 10.0,
        }
    }
}

/// Percentage of each cell's counts coming from features whose name matches `pattern`.
/// Cells without counts get 0.
pub fn percentage_feature_set(matrix: &FeatureBarcodeMatrix, pattern: &str) -> Result<Vec<f64>, Error> {
    let re = Regex::new(pattern).with_context(|| format!("invalid feature pattern {pattern:?}"))?;
    let selected: Vec<bool> = matrix.feature_names.iter().map(|n| re.is_match(n)).collect();
    info!(
        "{} features match {:?}",
        selected.iter().filter(|&&s| s).count(),
        pattern
    );

    Ok(matrix
        .matrix
        .outer_iterator()
        .map(|col| {
            let mut total = 0u64;
            let mut matched = 0u64;
            for (row, &v) in col.iter() {
                total += v as u64;
                if selected[row] {
                    matched += v as u64;
                }
            }
            if total == 0 {
                0.0
            } else {
                100.0 * matched as f64 / total as f64
            }
        })
        .collect())
}

/// Library size, detected features and the three percentage columns for every cell.
pub fn annotate(matrix: &FeatureBarcodeMatrix, patterns: &QcPatterns) -> Result<CellMetadata, Error> {
    Ok(CellMetadata {
        barcodes: matrix.barcodes.clone(),
        n_count_rna: matrix.counts_per_barcode().into_iter().map(|c| c as f64).collect(),
        n_feature_rna: matrix.features_per_barcode(),
        percent_mt: percentage_feature_set(matrix, &patterns.mito)?,
        percent_ribo: percentage_feature_set(matrix, &patterns.ribo)?,
        percent_mrp: percentage_feature_set(matrix, &patterns.mito_ribo)?,
        ..CellMetadata::default()
    })
}

/// Indices of the cells passing `thresholds`, in order.
pub fn cells_passing(meta: &CellMetadata, thresholds: &QcThresholds) -> Vec<usize> {
    (0..meta.num_cells())
        .filter(|&i| {
            let n_feature = meta.n_feature_rna[i];
            n_feature > thresholds.min_features
                && n_feature < thresholds.max_features
                && meta.percent_mt[i] < thresholds.max_percent_mt
        })
        .collect()
}
