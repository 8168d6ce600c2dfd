//! Layout optimization by stochastic gradient descent on the fuzzy set cross entropy.
//!
//! The optimization is parallelized but deterministic. Edges are split into a fixed number
//! of chunks; each chunk accumulates its position updates into a private buffer against a
//! frozen copy of the embedding, and the buffers are summed in chunk order at the end of
//! each epoch. Every (epoch, edge) pair gets its own RNG seed, so neither the thread count
//! nor rayon's work stealing changes the result.

use crate::embedding::EdgeList;
use crate::Q;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;

const NUM_CHUNKS: usize = 16;
const GRAD_CLIP: Q = 4.0;

/// Hyper-parameters of the optimization
#[derive(Clone, Copy, Debug)]
pub struct OptimizeParams {
    /// `a` of the low-dimensional similarity curve
    pub a: Q,
    /// `b` of the low-dimensional similarity curve
    pub b: Q,
    /// Weight of the repulsive term
    pub gamma: Q,
    /// Initial learning rate, decayed linearly to 0
    pub learning_rate: Q,
    /// Negative samples drawn per positive sample
    pub negative_sample_rate: usize,
    /// Number of epochs
    pub n_epochs: usize,
    /// Seed for negative sampling
    pub seed: u64,
}

/// State of an in-progress layout optimization
pub struct State {
    params: OptimizeParams,
    edges: EdgeList,
    epochs_per_negative_sample: Vec<Q>,
    epoch_of_next_sample: Vec<Q>,
    epoch_of_next_negative_sample: Vec<Q>,
    alpha: Q,
    current_epoch: usize,
    embedding: Array2<Q>,
    updates: Vec<ChunkUpdate>,
}

#[derive(Clone)]
struct ChunkUpdate {
    embedding: Array2<Q>,
    /// (edge, increment) pairs for `epoch_of_next_sample` and `epoch_of_next_negative_sample`
    next_sample: Vec<(usize, Q)>,
    next_negative_sample: Vec<(usize, Q)>,
}

impl ChunkUpdate {
    fn clear(&mut self) {
        self.embedding.fill(0.0);
        self.next_sample.clear();
        self.next_negative_sample.clear();
    }
}

impl State {
    /// Prepare the optimization of `embedding` along the sampled `edges`.
    pub fn new(params: OptimizeParams, edges: EdgeList, embedding: Array2<Q>) -> State {
        let epochs_per_negative_sample = edges
            .epochs_per_sample
            .iter()
            .map(|&e| e / params.negative_sample_rate.max(1) as Q)
            .collect::<Vec<_>>();

        let update = ChunkUpdate {
            embedding: Array2::zeros(embedding.dim()),
            next_sample: Vec::new(),
            next_negative_sample: Vec::new(),
        };

        State {
            params,
            epoch_of_next_sample: edges.epochs_per_sample.clone(),
            epoch_of_next_negative_sample: epochs_per_negative_sample.clone(),
            epochs_per_negative_sample,
            edges,
            alpha: params.learning_rate,
            current_epoch: 0,
            embedding,
            updates: vec![update; NUM_CHUNKS],
        }
    }

    /// Number of epochs run so far
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Total number of epochs
    pub fn n_epochs(&self) -> usize {
        self.params.n_epochs
    }

    /// Current coordinates
    pub fn embedding(&self) -> &Array2<Q> {
        &self.embedding
    }

    /// Consume the state, returning the coordinates
    pub fn into_embedding(self) -> Array2<Q> {
        self.embedding
    }

    /// Run all remaining epochs
    pub fn optimize(&mut self) {
        while self.step() {}
    }

    /// Run one epoch. Returns false once all epochs are done.
    pub fn step(&mut self) -> bool {
        if self.current_epoch >= self.params.n_epochs {
            return false;
        }

        self.run_epoch();

        self.alpha = self.params.learning_rate * (1.0 - self.current_epoch as Q / self.params.n_epochs as Q);
        self.current_epoch += 1;
        true
    }

    fn run_epoch(&mut self) {
        let n_edges = self.edges.len();
        let chunk_size = n_edges / NUM_CHUNKS + 1;
        let mut updates = std::mem::take(&mut self.updates);

        {
            let state = &*self;
            updates.par_iter_mut().enumerate().for_each(|(chunk, update)| {
                let start = (chunk * chunk_size).min(n_edges);
                let end = ((chunk + 1) * chunk_size).min(n_edges);
                for i in start..end {
                    state.sample_edge(i, update);
                }
            });
        }

        // apply in chunk order
        let mut total = Array2::zeros(self.embedding.dim());
        for update in updates.iter_mut() {
            total += &update.embedding;
            for &(i, v) in &update.next_sample {
                self.epoch_of_next_sample[i] += v;
            }
            for &(i, v) in &update.next_negative_sample {
                self.epoch_of_next_negative_sample[i] += v;
            }
            update.clear();
        }
        self.embedding += &total;
        self.updates = updates;
    }

    fn sample_edge(&self, i: usize, update: &mut ChunkUpdate) {
        let epoch = self.current_epoch as Q;
        if self.epoch_of_next_sample[i] > epoch {
            return;
        }

        let seed = self.params.seed ^ ((self.current_epoch as u64) << 32 | i as u64);
        let mut random = Pcg64Mcg::seed_from_u64(seed);

        let OptimizeParams { a, b, gamma, .. } = self.params;
        let alpha = self.alpha;
        let n_points = self.embedding.nrows();
        let dim = self.embedding.ncols();

        let j = self.edges.head[i];
        let k = self.edges.tail[i];

        // attraction
        let dist_sq = self.dist_sq(j, k);
        let grad_coeff = if dist_sq > 0.0 {
            (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b))
        } else {
            0.0
        };
        for d in 0..dim {
            let grad_d = (grad_coeff * (self.embedding[[j, d]] - self.embedding[[k, d]])).clamp(-GRAD_CLIP, GRAD_CLIP);
            update.embedding[[j, d]] += grad_d * alpha;
            update.embedding[[k, d]] -= grad_d * alpha;
        }
        update.next_sample.push((i, self.edges.epochs_per_sample[i]));

        // repulsion from random points
        let n_neg_samples =
            ((epoch - self.epoch_of_next_negative_sample[i]) / self.epochs_per_negative_sample[i]).floor();
        for _ in 0..n_neg_samples.max(0.0) as usize {
            let k = random.gen_range(0..n_points);
            if j == k {
                continue;
            }

            let dist_sq = self.dist_sq(j, k);
            let grad_coeff = if dist_sq > 0.0 {
                (2.0 * gamma * b) / ((1e-3 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
            } else {
                0.0
            };
            if grad_coeff <= 0.0 {
                continue;
            }
            for d in 0..dim {
                let grad_d =
                    (grad_coeff * (self.embedding[[j, d]] - self.embedding[[k, d]])).clamp(-GRAD_CLIP, GRAD_CLIP);
                update.embedding[[j, d]] += grad_d * alpha;
            }
        }
        update
            .next_negative_sample
            .push((i, n_neg_samples * self.epochs_per_negative_sample[i]));
    }

    #[inline]
    fn dist_sq(&self, j: usize, k: usize) -> Q {
        let x = self.embedding.row(j);
        let y = self.embedding.row(k);
        x.iter().zip(y).map(|(&x, &y)| (x - y) * (x - y)).sum()
    }
}
