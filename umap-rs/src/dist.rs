use crate::Q;

/// Distance used to find nearest neighbors in the input space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceType {
    /// Straight-line distance
    Euclidean,
    /// One minus the cosine similarity
    Cosine,
}

impl DistanceType {
    /// Parse a metric name (`euclidean` or `cosine`)
    pub fn from_name(name: &str) -> Option<DistanceType> {
        match name.to_ascii_lowercase().as_str() {
            "euclidean" => Some(DistanceType::Euclidean),
            "cosine" => Some(DistanceType::Cosine),
            _ => None,
        }
    }

    /// The distance reported to the fuzzy set construction
    #[inline]
    pub fn distance(&self, x: &[Q], y: &[Q]) -> Q {
        match self {
            DistanceType::Euclidean => euclidean(x, y),
            DistanceType::Cosine => cosine(x, y),
        }
    }

    /// A true metric that orders points like `distance`, for use in the vantage-point tree.
    /// Cosine distance violates the triangle inequality but its square root does not.
    #[inline]
    pub(crate) fn metric(&self, x: &[Q], y: &[Q]) -> Q {
        match self {
            DistanceType::Euclidean => euclidean(x, y),
            DistanceType::Cosine => cosine(x, y).sqrt(),
        }
    }

    /// Map a value returned by `metric` back to `distance`
    #[inline]
    pub(crate) fn metric_to_distance(&self, m: Q) -> Q {
        match self {
            DistanceType::Euclidean => m,
            DistanceType::Cosine => m * m,
        }
    }
}

#[inline]
pub fn euclidean(x: &[Q], y: &[Q]) -> Q {
    x.iter().zip(y).map(|(&a, &b)| (a - b) * (a - b)).sum::<Q>().sqrt()
}

#[inline]
pub fn cosine(x: &[Q], y: &[Q]) -> Q {
    let (s_xx, s_yy, s_xy) = x.iter().zip(y).fold((0., 0., 0.), |acc, (&x, &y)| {
        (acc.0 + x * x, acc.1 + y * y, acc.2 + x * y)
    });
    if s_xx == 0.0 && s_yy == 0.0 {
        0.0
    } else if s_xx == 0.0 || s_yy == 0.0 || s_xy == 0.0 {
        1.0
    } else {
        (1.0 - s_xy / (s_xx * s_yy).sqrt()).max(0.0)
    }
}
