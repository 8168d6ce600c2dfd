//! # scexplore: exploratory single-cell RNA-seq analysis
//!
//! Loads a 10x feature-barcode matrix, filters cells on quality metrics, scores the
//! cell cycle, applies a variance-stabilizing transformation, reduces dimensions
//! (PCA, UMAP), clusters the shared-nearest-neighbor graph over a range of
//! resolutions and reports marker genes. [`pipeline::run`] chains every step.

/// Cell-cycle phase scoring
pub mod cell_cycle;

/// Louvain clustering over a sweep of resolutions
pub mod clustering;

pub mod clustree;

/// Saved analysis state
pub mod dataset;

/// Dimensionality reduction methods
pub mod dim_red;

pub mod dot_plot;

/// Per-cluster marker genes
pub mod markers;

/// Per-cell annotations
pub mod metadata;

/// MTX loading routine
pub mod mtx;

/// Nearest-neighbor graphs
pub mod nn;

/// Count matrix normalization methods
pub mod normalization;

pub mod panels;

/// Settings of the whole analysis
pub mod params;

pub mod pipeline;

/// SVG figures
pub mod plot;

/// Quality-control metrics
pub mod qc;

/// Regularized negative-binomial transformation
pub mod sctransform;

pub mod stats;

pub use dataset::Dataset;
pub use params::AnalysisParams;
