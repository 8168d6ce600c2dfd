//! The full analysis, from a 10x matrix directory to markers, plots and a saved dataset.

use crate::cell_cycle::{cell_cycle_scoring, G2M_GENES, S_GENES};
use crate::clustering::find_clusters;
use crate::clustree::ClusterTree;
use crate::dataset::Dataset;
use crate::dim_red::{run_pca, RandSvd};
use crate::dot_plot::dot_plot_data;
use crate::markers::{find_all_markers, write_markers_csv, MarkerRow};
use crate::metadata::{CellMetadata, Phase};
use crate::mtx::{apply_min_filters, load_10x_dir};
use crate::nn::find_neighbors;
use crate::normalization::log_normalize;
use crate::panels::PanelSet;
use crate::params::AnalysisParams;
use crate::plot;
use crate::qc;
use crate::sctransform::sctransform;
use anyhow::{bail, Context, Error};
use log::{info, warn};
use ndarray::s;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const MARKERS_CSV: &str = "markers.csv";
pub const DATASET_FILE: &str = "dataset.bin.gz";
pub const CLUSTREE_CSV: &str = "clustree_edges.csv";
pub const METADATA_CSV: &str = "metadata.csv";
pub const PLOT_DIR: &str = "plots";

/// Metadata column used as a latent variable in the residual regression
fn latent_variable(meta: &CellMetadata, name: &str) -> Result<Vec<f64>, Error> {
    let values = match name {
        "nCount_RNA" => meta.n_count_rna.clone(),
        "nFeature_RNA" => meta.n_feature_rna.iter().map(|&v| v as f64).collect(),
        "percent.mt" => meta.percent_mt.clone(),
        "percent.ribo" => meta.percent_ribo.clone(),
        "percent.mrp" => meta.percent_mrp.clone(),
        "S.Score" => meta.s_score.clone(),
        "G2M.Score" => meta.g2m_score.clone(),
        _ => bail!("cannot regress out unknown metadata column '{}'", name),
    };
    if values.len() != meta.num_cells() {
        bail!("metadata column '{}' has not been computed", name);
    }
    Ok(values)
}

struct Steps {
    current: usize,
    tick: Instant,
}

impl Steps {
    fn new() -> Steps {
        Steps {
            current: 0,
            tick: Instant::now(),
        }
    }

    fn start(&mut self, name: &str) {
        self.current += 1;
        info!(
            "step {}: {} ({:.1}s elapsed)",
            self.current,
            name,
            self.tick.elapsed().as_secs_f64()
        );
    }
}

fn qc_plots(dir: &Path, meta: &CellMetadata) -> Result<(), Error> {
    let n_feature: Vec<f64> = meta.n_feature_rna.iter().map(|&v| v as f64).collect();
    plot::violin_panels(
        &dir.join("qc_violin.svg"),
        &[
            ("nFeature_RNA", &n_feature),
            ("nCount_RNA", &meta.n_count_rna),
            ("percent.mt", &meta.percent_mt),
            ("percent.ribo", &meta.percent_ribo),
            ("percent.mrp", &meta.percent_mrp),
        ],
    )?;
    plot::feature_scatter(
        &dir.join("qc_scatter_count_mt.svg"),
        "nCount_RNA",
        "percent.mt",
        &meta.n_count_rna,
        &meta.percent_mt,
    )?;
    plot::feature_scatter(
        &dir.join("qc_scatter_count_feature.svg"),
        "nCount_RNA",
        "nFeature_RNA",
        &meta.n_count_rna,
        &n_feature,
    )?;
    Ok(())
}

fn cluster_categories(clusters: &[u32]) -> (Vec<String>, Vec<usize>) {
    let n = clusters.iter().max().map_or(0, |&m| m as usize + 1);
    let names = (0..n).map(|c| c.to_string()).collect();
    (names, clusters.iter().map(|&c| c as usize).collect())
}

fn embedding_plots(dir: &Path, dataset: &Dataset) -> Result<(), Error> {
    let umap = match &dataset.umap {
        Some(u) => u,
        None => return Ok(()),
    };
    let meta = &dataset.metadata;
    if let Some(clusters) = meta.seurat_clusters() {
        let (names, labels) = cluster_categories(clusters);
        plot::embedding_plot(&dir.join("umap_seurat_clusters.svg"), "seurat_clusters", umap.view(), &names, &labels)?;
    }

    let phases = [Phase::G1, Phase::S, Phase::G2M, Phase::Undecided];
    if meta.phase.len() == meta.num_cells() {
        let names: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
        let labels: Vec<usize> = meta
            .phase
            .iter()
            .map(|p| phases.iter().position(|q| q == p).unwrap_or(0))
            .collect();
        plot::embedding_plot(&dir.join("umap_phase.svg"), "Phase", umap.view(), &names, &labels)?;
    }

    for res in &meta.resolutions {
        let (names, labels) = cluster_categories(&res.clusters);
        let column = res.column_name();
        plot::embedding_plot(&dir.join(format!("umap_{}.svg", column)), &column, umap.view(), &names, &labels)?;
    }
    Ok(())
}

fn panel_plots(dir: &Path, dataset: &Dataset, panels: &PanelSet, names: &[String]) -> Result<(), Error> {
    let (sct, clusters) = match (&dataset.sct, dataset.metadata.seurat_clusters()) {
        (Some(sct), Some(clusters)) => (sct, clusters),
        _ => return Ok(()),
    };
    let index: HashMap<&str, usize> = sct
        .feature_names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();
    let data = sct.data.to_csr();

    for panel in panels.select(names) {
        let genes = panel.resolve(&index);
        if genes.is_empty() {
            warn!("no gene of panel {} is in the matrix, skipping its dot plot", panel.name);
            continue;
        }
        let entries = dot_plot_data(&data, &genes, clusters)?;
        let gene_names: Vec<String> = genes.iter().map(|(g, _)| g.clone()).collect();
        plot::dot_plot(
            &dir.join(format!("dotplot_{}.svg", panel.name)),
            &panel.name,
            &gene_names,
            &entries,
        )?;
    }
    Ok(())
}

/// Run every step on the 10x matrix in `input`, writing results into `out_dir`.
/// Returns the final dataset, which is also saved there.
pub fn run(input: &Path, out_dir: &Path, params: &AnalysisParams, panels: &PanelSet) -> Result<Dataset, Error> {
    params.validate()?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let plot_dir: Option<PathBuf> = if params.plots {
        let dir = out_dir.join(PLOT_DIR);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Some(dir)
    } else {
        None
    };
    let mut steps = Steps::new();

    steps.start("load");
    let matrix = load_10x_dir(input)?;
    let matrix = apply_min_filters(matrix, params.min_cells, params.min_features);
    info!(
        "{} features x {} barcodes loaded from {}",
        matrix.num_features(),
        matrix.num_barcodes(),
        input.display()
    );

    steps.start("quality control");
    let meta = qc::annotate(&matrix, &params.qc_patterns)?;
    if let Some(dir) = &plot_dir {
        qc_plots(dir, &meta).context("drawing QC plots")?;
    }
    let keep = qc::cells_passing(&meta, &params.qc);
    info!("{} of {} cells pass QC", keep.len(), meta.num_cells());
    if keep.is_empty() {
        bail!("no cell passes the QC thresholds {:?}", params.qc);
    }
    let mut dataset = Dataset::new(matrix.select_barcodes(&keep), meta.subset(&keep));
    drop(matrix);

    steps.start("log-normalization");
    let log_data = log_normalize(&dataset.counts.matrix, params.scale_factor);

    steps.start("cell-cycle scoring");
    let scores = cell_cycle_scoring(
        &log_data,
        &dataset.counts.feature_names,
        &S_GENES,
        &G2M_GENES,
        &params.cell_cycle,
    )?;
    dataset.log_data = Some(log_data);
    dataset.metadata.s_score = scores.s_score;
    dataset.metadata.g2m_score = scores.g2m_score;
    dataset.metadata.phase = scores.phase;

    steps.start("variance-stabilizing transformation");
    let latent = params
        .vars_to_regress
        .iter()
        .map(|name| latent_variable(&dataset.metadata, name))
        .collect::<Result<Vec<_>, _>>()?;
    let sct = sctransform(&dataset.counts, &latent, &params.sct)?;
    let top: Vec<&str> = sct.variable_feature_names().into_iter().take(10).collect();
    info!("top variable features: {}", top.join(", "));
    dataset.metadata.n_count_sct = sct.counts_per_cell();
    dataset.metadata.n_feature_sct = sct.features_per_cell();

    steps.start("PCA");
    let svd = RandSvd {
        seed: params.pca_seed,
        ..RandSvd::default()
    };
    let pca = run_pca(&sct.scale_data, params.n_pcs, &svd)?;
    dataset.sct = Some(sct);
    if let Some(dir) = &plot_dir {
        plot::elbow_plot(&dir.join("elbow.svg"), pca.stdev.as_slice().unwrap_or(&[]))?;
    }

    steps.start("UMAP");
    let umap_dims = params.umap.n_dims.min(pca.num_components());
    let umap = params.umap.to_umap()?;
    dataset.umap = Some(umap.fit_transform(pca.embeddings.slice(s![.., ..umap_dims])));

    steps.start("neighbor graph and clustering");
    let snn = find_neighbors(pca.embeddings.view(), &params.neighbors)?;
    dataset.pca = Some(pca);
    dataset.metadata.resolutions = find_clusters(&snn, &params.clustering)?;
    dataset.metadata.choose_resolution(params.clustering.chosen_resolution)?;
    dataset.snn = Some(snn);

    steps.start("cluster tree");
    let tree = ClusterTree::build(&dataset.metadata.resolutions)?;
    tree.write_edges_csv(&out_dir.join(CLUSTREE_CSV))?;
    if let Some(dir) = &plot_dir {
        plot::clustree_plot(&dir.join("clustree.svg"), &tree)?;
    }

    steps.start("marker genes");
    let markers = match (&dataset.sct, dataset.metadata.seurat_clusters()) {
        (Some(sct), Some(clusters)) if clusters.iter().any(|&c| c > 0) => find_all_markers(
            &sct.data,
            &sct.feature_names,
            clusters,
            &params.markers,
            &params.marker_filter,
        )?,
        _ => {
            warn!("a single cluster at the chosen resolution, no markers to report");
            Vec::<MarkerRow>::new()
        }
    };
    write_markers_csv(&markers, &out_dir.join(MARKERS_CSV))?;

    if let Some(dir) = &plot_dir {
        steps.start("plots");
        embedding_plots(dir, &dataset).context("drawing embeddings")?;
        panel_plots(dir, &dataset, panels, &params.plot_panels).context("drawing dot plots")?;
    }

    steps.start("save");
    dataset.metadata.write_csv(out_dir.join(METADATA_CSV))?;
    dataset.save(out_dir.join(DATASET_FILE))?;
    info!("analysis of {} cells finished", dataset.num_cells());
    Ok(dataset)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::markers::MarkerRow;
    use crate::mtx::test::write_text;
    use crate::panels::GenePanel;
    use crate::sctransform::test::synthetic_counts;
    use scan_types::FeatureBarcodeMatrix;

    fn write_10x(dir: &Path, m: &FeatureBarcodeMatrix) {
        let mut mtx = String::from("%%MatrixMarket matrix coordinate integer general\n");
        mtx.push_str(&format!("{} {} {}\n", m.num_features(), m.num_barcodes(), m.matrix.nnz()));
        for (&v, (row, col)) in m.matrix.iter() {
            mtx.push_str(&format!("{} {} {}\n", row + 1, col + 1, v));
        }
        write_text(&dir.join("matrix.mtx.gz"), &mtx, true);

        let features: String = m
            .feature_ids
            .iter()
            .zip(&m.feature_names)
            .map(|(id, name)| format!("{id}\t{name}\tGene Expression\n"))
            .collect();
        write_text(&dir.join("features.tsv.gz"), &features, true);
        let barcodes: String = m.barcodes.iter().map(|b| format!("{b}\n")).collect();
        write_text(&dir.join("barcodes.tsv.gz"), &barcodes, true);
    }

    fn small_params() -> AnalysisParams {
        let mut p = AnalysisParams::default();
        p.qc.min_features = 0;
        p.qc.max_features = 1_000_000;
        p.qc.max_percent_mt = 100.0;
        p.sct.n_genes = None;
        p.sct.n_cells = None;
        p.sct.n_variable_features = 100;
        p.n_pcs = 10;
        p.umap.n_dims = 10;
        p.umap.n_neighbors = 15;
        p.neighbors.n_dims = 10;
        p.neighbors.k_param = 10;
        p.clustering.resolutions = vec![0.0, 0.5, 1.0];
        p.plot_panels = vec!["Bipotential".into(), "Panel_app_DSD_short".into(), "Custom".into()];
        p
    }

    #[test]
    fn test_run() {
        let mut m = synthetic_counts(300, 160, 11);
        for i in 0..6 {
            m.feature_names[20 + i] = S_GENES[i].to_string();
            m.feature_names[30 + i] = G2M_GENES[i].to_string();
        }
        m.feature_names[40] = "MT-CO1".to_string();
        m.feature_names[41] = "RPL13".to_string();

        let input = tempfile::tempdir().unwrap();
        write_10x(input.path(), &m);
        let out = tempfile::tempdir().unwrap();

        let mut panels = PanelSet::builtin();
        panels.insert(GenePanel {
            name: "Custom".into(),
            genes: vec!["G0".into(), "G1".into(), "G50".into(), "NOT_A_GENE".into()],
        });
        let params = small_params();
        let ds = run(input.path(), out.path(), &params, &panels).unwrap();

        assert_eq!(ds.num_cells(), 160);
        assert_eq!(ds.metadata.resolutions.len(), 3);
        let clusters = ds.metadata.seurat_clusters().unwrap().to_vec();
        assert_eq!(clusters.len(), 160);
        assert!(clusters.iter().any(|&c| c > 0));
        assert_eq!(ds.umap.as_ref().unwrap().dim(), (160, 2));
        assert!(ds.metadata.percent_mt.iter().any(|&p| p > 0.0));

        let mut reader = csv::Reader::from_path(out.path().join(MARKERS_CSV)).unwrap();
        let rows: Vec<MarkerRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.p_val_adj <= 0.05 && r.avg_log2fc >= 0.25));
        assert!(rows.windows(2).all(|w| w[0].cluster <= w[1].cluster));

        for file in [CLUSTREE_CSV, METADATA_CSV] {
            assert!(out.path().join(file).exists(), "{file} missing");
        }
        let plots = out.path().join(PLOT_DIR);
        for file in [
            "qc_violin.svg",
            "elbow.svg",
            "clustree.svg",
            "umap_seurat_clusters.svg",
            "umap_phase.svg",
            "umap_SCT_snn_res.0.5.svg",
            "dotplot_Custom.svg",
        ] {
            assert!(plots.join(file).exists(), "{file} missing");
        }
        assert!(!plots.join("dotplot_Bipotential.svg").exists());

        let loaded = Dataset::load(out.path().join(DATASET_FILE)).unwrap();
        assert_eq!(loaded.metadata.seurat_clusters().unwrap(), &clusters[..]);
        assert_eq!(loaded.umap, ds.umap);

        // same input, same result
        let again = run(input.path(), out.path(), &params, &panels).unwrap();
        assert_eq!(again.metadata.resolutions, ds.metadata.resolutions);
        assert_eq!(again.umap, ds.umap);
    }

    #[test]
    fn test_run_errors() {
        let m = synthetic_counts(60, 20, 3);
        let input = tempfile::tempdir().unwrap();
        write_10x(input.path(), &m);
        let out = tempfile::tempdir().unwrap();

        // default QC removes every cell of this tiny matrix
        let mut params = AnalysisParams::default();
        params.plots = false;
        assert!(run(input.path(), out.path(), &params, &PanelSet::builtin()).is_err());

        // no cell-cycle markers in the matrix
        let params = small_params();
        assert!(run(input.path(), out.path(), &params, &PanelSet::builtin()).is_err());

        let missing = out.path().join("missing");
        assert!(run(&missing, out.path(), &params, &PanelSet::builtin()).is_err());
    }
}
