use crate::dist::DistanceType;
use crate::Q;
use log::warn;
use ndarray::{Array2, ArrayView2, Axis};
use noisy_float::checkers::NumChecker;
use noisy_float::NoisyFloat;
use num_traits::Bounded;
use rayon::prelude::*;
use vpsearch::{BestCandidate, MetricSpace, Tree};

type Dist = NoisyFloat<Q, NumChecker>;

#[derive(Clone, Debug)]
struct Sample<'a> {
    data: &'a [Q],
}

impl vpsearch::MetricSpace for Sample<'_> {
    type UserData = DistanceType;
    type Distance = Dist;

    fn distance(&self, other: &Self, metric: &Self::UserData) -> Self::Distance {
        NoisyFloat::new(metric.metric(self.data, other.data))
    }
}

/// Collects the `max_item_count` closest candidates seen by the tree search, ordered by distance.
struct CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    max_item_count: usize,
    max_observed_distance: Item::Distance,
    distance_x_index: Vec<(Item::Distance, usize)>,
}

impl<Item, Impl> CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Item::Distance as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Item::Distance as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    fn insert_index(&mut self, index: usize, distance: Item::Distance) {
        let val = (distance, index);
        let pos = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(pos, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            self.max_observed_distance = self.distance_x_index[self.max_item_count - 1].0;
        }
    }
}

impl<'a, Item, Impl> BestCandidate<Item, Impl> for &'a mut CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl> + Clone,
    Item::Distance: Ord,
{
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Item::Distance, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Item, distance: Item::Distance, candidate_index: usize, _: &Item::UserData) {
        if self.max_item_count == 0 {
            return;
        }

        if distance < self.max_observed_distance || self.distance_x_index.len() < self.max_item_count {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Item::Distance {
        self.max_observed_distance
    }

    fn result(self, _: &Item::UserData) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

/// Find the `k` nearest neighbors of every row of `data`, counting the point itself.
/// Column 0 of the result is always the query point at distance 0; the remaining
/// columns are sorted by increasing distance.
/// If fewer than `k` points exist, `k` is reduced to the number of points.
pub fn nearest_neighbors(
    data: ArrayView2<Q>,
    mut k: usize,
    distance_type: DistanceType,
) -> (Array2<usize>, Array2<Q>) {
    let n_samples = data.nrows();
    if n_samples < k {
        warn!("{} neighbors requested, but only {} points available", k, n_samples);
        k = n_samples;
    }

    let rows: Vec<Vec<Q>> = data.axis_iter(Axis(0)).map(|r| r.to_vec()).collect();
    let samples: Vec<Sample> = rows.iter().map(|r| Sample { data: r }).collect();
    let vp = Tree::new_with_user_data_ref(&samples, &distance_type);

    let mut indices = Array2::from_elem((n_samples, k), usize::MAX);
    let mut distances = Array2::from_elem((n_samples, k), Q::INFINITY);

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k),
            |neighborhood, (cell, (mut indices, mut distances))| {
                if k == 0 {
                    return;
                }
                neighborhood.clear();
                indices[0] = cell;
                distances[0] = 0.0;

                // duplicate points may push the query out of its own top k
                let mut j = 1;
                for (dist, idx) in vp.find_nearest_custom(&samples[cell], &distance_type, &mut *neighborhood) {
                    if idx != cell && j < k {
                        indices[j] = idx;
                        distances[j] = distance_type.metric_to_distance(dist.raw());
                        j += 1;
                    }
                }
            },
        );

    (indices, distances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn exhaustive(data: &Array2<Q>, k: usize, d: DistanceType) -> Vec<Vec<usize>> {
        (0..data.nrows())
            .map(|i| {
                let mut all: Vec<(Q, usize)> = (0..data.nrows())
                    .filter(|&j| j != i)
                    .map(|j| {
                        let x = data.row(i).to_vec();
                        let y = data.row(j).to_vec();
                        (d.distance(&x, &y), j)
                    })
                    .collect();
                all.sort_by(|a, b| a.partial_cmp(b).unwrap());
                std::iter::once(i).chain(all.into_iter().take(k - 1).map(|(_, j)| j)).collect()
            })
            .collect()
    }

    #[test]
    fn test_knn_matches_exhaustive() {
        let mut rng = Pcg64::seed_from_u64(0);
        let data = Array2::from_shape_fn((200, 5), |_| rng.gen_range(-1.0..1.0));

        for d in [DistanceType::Euclidean, DistanceType::Cosine] {
            let (idx, dist) = nearest_neighbors(data.view(), 10, d);
            let expected = exhaustive(&data, 10, d);
            for i in 0..data.nrows() {
                assert_eq!(idx.row(i).to_vec(), expected[i]);
                assert_eq!(dist[[i, 0]], 0.0);
                let row = dist.row(i);
                assert!(row.windows(2).into_iter().all(|w| w[0] <= w[1] + 1e-12));
            }
        }
    }

    #[test]
    fn test_knn_small_input() {
        let data = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 1.0, 0.0, 0.0, 2.0]).unwrap();
        let (idx, dist) = nearest_neighbors(data.view(), 5, DistanceType::Euclidean);
        assert_eq!(idx.dim(), (3, 3));
        assert_eq!(idx.row(0).to_vec(), vec![0, 1, 2]);
        assert_eq!(dist.row(0).to_vec(), vec![0.0, 1.0, 2.0]);
    }
}
