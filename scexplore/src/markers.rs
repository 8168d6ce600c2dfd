//! Marker genes of every cluster against all other cells.

use anyhow::{bail, Context, Error};
use diff_exp::{find_markers, MarkerParams};
use log::info;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::path::Path;
use std::time::Instant;

/// Rows kept in the exported marker table
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerFilter {
    pub max_p_val_adj: f64,
    pub min_log2fc: f64,
}

impl Default for MarkerFilter {
    fn default() -> Self {
        MarkerFilter {
            max_p_val_adj: 0.05,
            min_log2fc: 0.25,
        }
    }
}

pub const MARKER_COLUMNS: [&str; 7] = ["p_val", "avg_log2FC", "pct.1", "pct.2", "p_val_adj", "cluster", "gene"];

/// One row of `markers.csv`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRow {
    pub p_val: f64,
    #[serde(rename = "avg_log2FC")]
    pub avg_log2fc: f64,
    #[serde(rename = "pct.1")]
    pub pct_1: f64,
    #[serde(rename = "pct.2")]
    pub pct_2: f64,
    pub p_val_adj: f64,
    pub cluster: u32,
    pub gene: String,
}

/// Test every cluster in `clusters` against the remaining cells on `data`
/// (features x cells, log1p scale). Rows are ordered by cluster, then p-value.
pub fn find_all_markers(
    data: &CsMat<f64>,
    feature_names: &[String],
    clusters: &[u32],
    params: &MarkerParams,
    filter: &MarkerFilter,
) -> Result<Vec<MarkerRow>, Error> {
    if feature_names.len() != data.rows() {
        bail!("{} feature names given for {} features", feature_names.len(), data.rows());
    }
    if clusters.len() != data.cols() {
        bail!("{} cluster labels given for {} cells", clusters.len(), data.cols());
    }
    let n_clusters = clusters.iter().max().map_or(0, |&m| m + 1);
    if n_clusters < 2 {
        bail!("marker detection needs at least two clusters, found {}", n_clusters);
    }

    let tick = Instant::now();
    let csr = data.to_csr();
    let mut rows = Vec::new();
    for cluster in 0..n_clusters {
        let group: Vec<Option<bool>> = clusters.iter().map(|&c| Some(c == cluster)).collect();
        if !group.contains(&Some(true)) {
            continue;
        }
        let results =
            find_markers(&csr, &group, params).with_context(|| format!("finding markers of cluster {}", cluster))?;
        let before = rows.len();
        rows.extend(
            results
                .into_iter()
                .filter(|r| r.p_val_adj <= filter.max_p_val_adj && r.avg_log2fc >= filter.min_log2fc)
                .map(|r| MarkerRow {
                    p_val: r.p_val,
                    avg_log2fc: r.avg_log2fc,
                    pct_1: r.pct_1,
                    pct_2: r.pct_2,
                    p_val_adj: r.p_val_adj,
                    cluster,
                    gene: feature_names[r.feature].clone(),
                }),
        );
        info!("cluster {}: {} markers", cluster, rows.len() - before);
    }
    info!(
        "{} markers over {} clusters in {:.2}s",
        rows.len(),
        n_clusters,
        tick.elapsed().as_secs_f64()
    );
    Ok(rows)
}

pub fn write_markers_csv(rows: &[MarkerRow], path: &Path) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record(MARKER_COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use sprs::TriMat;

    /// 3 clusters of 40 cells; gene `k` is high in cluster `k`, gene 3 is flat
    fn data() -> (CsMat<f64>, Vec<String>, Vec<u32>) {
        let n_cells = 120;
        let clusters: Vec<u32> = (0..n_cells).map(|c| (c / 40) as u32).collect();
        let mut tri = TriMat::new((4, n_cells));
        for cell in 0..n_cells {
            let cluster = clusters[cell] as usize;
            for gene in 0..3 {
                let v = if gene == cluster { 2.0 + (cell % 5) as f64 * 0.1 } else if cell % 4 == 0 { 0.5 } else { 0.0 };
                if v > 0.0 {
                    tri.add_triplet(gene, cell, v);
                }
            }
            tri.add_triplet(3, cell, 1.0);
        }
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string(), "FLAT".to_string()];
        (tri.to_csc(), names, clusters)
    }

    #[test]
    fn test_find_all_markers() {
        let (data, names, clusters) = data();
        let rows = find_all_markers(&data, &names, &clusters, &MarkerParams::default(), &MarkerFilter::default()).unwrap();
        assert_eq!(rows.len(), 3);
        for (k, row) in rows.iter().enumerate() {
            assert_eq!(row.cluster, k as u32);
            assert_eq!(row.gene, names[k]);
            assert_eq!(row.pct_1, 1.0);
            assert_eq!(row.pct_2, 0.25);
            assert!(row.p_val_adj <= 0.05);
            assert!(row.avg_log2fc >= 0.25);
        }
    }

    #[test]
    fn test_errors() {
        let (data, names, clusters) = data();
        let one = vec![0u32; clusters.len()];
        assert!(find_all_markers(&data, &names, &one, &MarkerParams::default(), &MarkerFilter::default()).is_err());
        assert!(find_all_markers(&data, &names[..2], &clusters, &MarkerParams::default(), &MarkerFilter::default()).is_err());
    }

    #[test]
    fn test_csv_header() {
        let rows = vec![MarkerRow {
            p_val: 1e-10,
            avg_log2fc: 1.5,
            pct_1: 0.9,
            pct_2: 0.1,
            p_val_adj: 1e-6,
            cluster: 2,
            gene: "SOX9".to_string(),
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.csv");
        write_markers_csv(&rows, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "p_val,avg_log2FC,pct.1,pct.2,p_val_adj,cluster,gene");
        assert!(lines.next().unwrap().ends_with(",2,SOX9"));

        write_markers_csv(&[], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), MARKER_COLUMNS.join(","));
    }
}
