//! Per-gene count models: Poisson GLM on log library size and the
//! negative-binomial dispersion by maximum likelihood.

use statrs::function::gamma::digamma;

/// Largest and smallest dispersion reported by [`theta_ml`]
pub const THETA_RANGE: (f64, f64) = (1e-7, 1e7);

/// Trigamma function, by recurrence to x >= 10 and the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let t = 1.0 / x;
    let t2 = t * t;
    acc + t + t2 / 2.0 + t * t2 * (1.0 / 6.0 - t2 * (1.0 / 30.0 - t2 * (1.0 / 42.0 - t2 / 30.0)))
}

/// Poisson regression `log(mu) = b0 + b1 * x` fitted by iteratively reweighted least
/// squares. Returns `(b0, b1)`, or None when `y` has no counts.
pub fn poisson_glm(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    assert_eq!(y.len(), x.len());
    if y.iter().all(|&v| v == 0.0) {
        return None;
    }

    let mut mu: Vec<f64> = y.iter().map(|&v| v + 0.1).collect();
    let mut eta: Vec<f64> = mu.iter().map(|m| m.ln()).collect();
    let mut coef = (0.0, 0.0);
    let mut dev_old = f64::INFINITY;

    for _ in 0..25 {
        let (mut sw, mut swx, mut swxx, mut swz, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for i in 0..y.len() {
            let w = mu[i];
            let z = eta[i] + (y[i] - mu[i]) / mu[i];
            sw += w;
            swx += w * x[i];
            swxx += w * x[i] * x[i];
            swz += w * z;
            swxz += w * x[i] * z;
        }
        let det = sw * swxx - swx * swx;
        coef = if det.abs() > 1e-12 * sw * swxx.max(1.0) {
            ((swxx * swz - swx * swxz) / det, (sw * swxz - swx * swz) / det)
        } else {
            // no spread in x: intercept-only model
            (swz / sw, 0.0)
        };

        let mut dev = 0.0;
        for i in 0..y.len() {
            eta[i] = coef.0 + coef.1 * x[i];
            mu[i] = eta[i].exp();
            let term = if y[i] > 0.0 { y[i] * (y[i] / mu[i]).ln() } else { 0.0 };
            dev += 2.0 * (term - (y[i] - mu[i]));
        }
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < 1e-8 {
            break;
        }
        dev_old = dev;
    }
    Some(coef)
}

/// Maximum-likelihood negative-binomial dispersion `theta` for counts `y` with
/// fitted means `mu`, by Newton iterations from the method-of-moments estimate.
/// At most `limit - 1` Newton steps are taken. The result is clamped to [`THETA_RANGE`].
pub fn theta_ml(y: &[f64], mu: &[f64], limit: usize) -> f64 {
    let n = y.len() as f64;
    let eps = f64::EPSILON.powf(0.25);

    let score = |th: f64| -> f64 {
        y.iter()
            .zip(mu)
            .map(|(&y, &m)| digamma(th + y) - digamma(th) + th.ln() + 1.0 - (th + m).ln() - (y + th) / (m + th))
            .sum()
    };
    let info = |th: f64| -> f64 {
        y.iter()
            .zip(mu)
            .map(|(&y, &m)| {
                -trigamma(th + y) + trigamma(th) - 1.0 / th + 2.0 / (m + th) - (y + th) / ((m + th) * (m + th))
            })
            .sum()
    };

    let moments: f64 = y.iter().zip(mu).map(|(&y, &m)| (y / m - 1.0).powi(2)).sum();
    let mut t0 = n / moments;
    let mut it = 1;
    let mut del = 1.0f64;
    while it < limit && del.abs() > eps && t0.is_finite() {
        t0 = t0.abs();
        del = score(t0) / info(t0);
        t0 += del;
        it += 1;
    }

    if t0.is_nan() {
        return THETA_RANGE.1;
    }
    t0.clamp(THETA_RANGE.0, THETA_RANGE.1)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Gamma, Poisson};
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_trigamma() {
        assert_approx_eq!(trigamma(1.0), std::f64::consts::PI.powi(2) / 6.0, 1e-10);
        assert_approx_eq!(trigamma(0.5), std::f64::consts::PI.powi(2) / 2.0, 1e-10);
        // psi1(x) = psi1(x + 1) + 1 / x^2
        assert_approx_eq!(trigamma(7.3), trigamma(8.3) + 1.0 / (7.3 * 7.3), 1e-12);
    }

    #[test]
    fn test_poisson_glm() {
        // mu = exp(-1 + 0.8 x) exactly when y equals its expectation
        let x: Vec<f64> = (0..50).map(|i| 2.0 + i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|v| (-1.0 + 0.8 * v).exp()).collect();
        let (b0, b1) = poisson_glm(&y, &x).unwrap();
        assert_approx_eq!(b0, -1.0, 1e-6);
        assert_approx_eq!(b1, 0.8, 1e-6);

        assert!(poisson_glm(&[0.0, 0.0], &[1.0, 2.0]).is_none());
        let (b0, b1) = poisson_glm(&[2.0, 4.0], &[1.0, 1.0]).unwrap();
        assert_approx_eq!(b0, 3f64.ln(), 1e-6);
        assert_eq!(b1, 0.0);
    }

    #[test]
    fn test_theta_ml() {
        // gamma-Poisson mixture with shape theta is negative binomial with dispersion theta
        let theta = 2.0;
        let mean = 5.0;
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let gamma = Gamma::new(theta, mean / theta).unwrap();
        let y: Vec<f64> = (0..4000)
            .map(|_| {
                let lambda: f64 = gamma.sample(&mut rng);
                Poisson::new(lambda.max(1e-12)).unwrap().sample(&mut rng)
            })
            .collect();
        let mu = vec![mean; y.len()];
        let est = theta_ml(&y, &mu, 10);
        assert!((est - theta).abs() < 0.4, "theta estimate {est}");
    }

    #[test]
    fn test_theta_without_overdispersion() {
        // y == mu has no excess variance
        let y = [3.0, 3.0, 3.0];
        let mu = [3.0, 3.0, 3.0];
        assert_eq!(theta_ml(&y, &mu, 10), THETA_RANGE.1);
    }
}
