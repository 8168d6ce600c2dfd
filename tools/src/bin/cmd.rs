// Command line utility for running the scexplore analysis

use anyhow::{Context, Error};
use clap::{value_parser, Arg, ArgAction, Command};
use log::info;
use scexplore::panels::PanelSet;
use scexplore::pipeline;
use scexplore::AnalysisParams;
use std::path::PathBuf;

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("scexplore-cmd")
        .about("Exploratory analysis of a 10x single-cell RNA-seq matrix")
        .arg(
            Arg::new("INPUT")
                .help("10x matrix directory (matrix.mtx, features.tsv, barcodes.tsv; optionally gzipped)")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PARAMS")
                .help("JSON file of analysis parameters; missing fields keep their defaults")
                .short('p')
                .long("params")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PANELS")
                .help("Extra gene panels, one `panel<TAB>gene` pair per line")
                .long("panels")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("RESOLUTION")
                .help("Clustering resolution used for markers and plots")
                .short('r')
                .long("resolution")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("NO_PLOTS")
                .help("Skip drawing figures")
                .long("no-plots")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("THREADS")
                .help("Number of worker threads, all cores by default")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(usize)),
        )
        .get_matches();

    let input: &PathBuf = matches.get_one("INPUT").context("missing INPUT")?;
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").context("missing OUT_DIR")?;

    if let Some(&threads) = matches.get_one::<usize>("THREADS") {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("setting up the thread pool")?;
    }

    let mut params = match matches.get_one::<PathBuf>("PARAMS") {
        Some(path) => AnalysisParams::from_json_file(path)?,
        None => AnalysisParams::default(),
    };
    if let Some(&resolution) = matches.get_one::<f64>("RESOLUTION") {
        params.clustering.chosen_resolution = resolution;
    }
    if matches.get_flag("NO_PLOTS") {
        params.plots = false;
    }

    let mut panels = PanelSet::builtin();
    if let Some(path) = matches.get_one::<PathBuf>("PANELS") {
        panels.extend(PanelSet::load_tsv(path)?);
    }

    let dataset = pipeline::run(input, out_dir, &params, &panels)?;
    info!(
        "{} cells in {} clusters, results in {}",
        dataset.num_cells(),
        dataset.metadata.seurat_clusters().map_or(0, |c| c.iter().max().map_or(0, |&m| m + 1)),
        out_dir.display()
    );
    Ok(())
}
