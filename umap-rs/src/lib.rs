//! Uniform Manifold Approximation and Projection (UMAP) of a dense data matrix.
#![deny(warnings)]

pub mod curve_fit;
pub mod dist;
pub mod embedding;
pub mod fuzzy;
pub mod knn;
pub mod optimize;
pub mod spectral;
pub mod umap;

/// Floating point type used throughout the crate
pub type Q = f64;

pub use dist::DistanceType;
pub use umap::Umap;
