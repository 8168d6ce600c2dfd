//! Shared types for feature-barcode count matrices.

/// Grouping of features by their declared feature type
pub mod label_class;

/// Feature-barcode count matrix with its row and column annotations
pub mod matrix;

pub use label_class::LabelClass;
pub use matrix::{CountMatrix, FeatureBarcodeMatrix, GenericFeatureBarcodeMatrix};
