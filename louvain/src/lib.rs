//! Louvain community detection on weighted, undirected graphs
#![deny(missing_docs)]
#![deny(warnings)]

/// Data structure for storing a clustering of nodes
pub mod clustering;

/// Data structure for storing a weighted, undirected graph (aka network)
pub mod network;

/// Louvain clustering algorithm
pub mod louvain;

/// Clustering objective functions
pub mod objective;

mod local_moving;


pub use clustering::Clustering;
pub use louvain::{Louvain, LouvainParams};
pub use network::Network;

trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.resize_with(len, T::default)
    }
}
