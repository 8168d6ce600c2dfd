use crate::Q;
use log::debug;
use ndarray::{Array1, Array2};

const N_POINTS: usize = 300;

/// The low-dimensional similarity curve `1 / (1 + a * x^(2b))`
#[inline]
pub fn curve(a: Q, b: Q, x: Q) -> Q {
    1.0 / (1.0 + a * x.powf(2.0 * b))
}

/// Fit `a` and `b` of [`curve`] to the target membership function
/// (1 below `min_dist`, exponential decay with scale `spread` above it),
/// sampled on 300 points spanning `[0, 3 * spread]`.
pub fn find_ab_params(spread: Q, min_dist: Q) -> (Q, Q) {
    let x = Array1::linspace(0.0, 3.0 * spread, N_POINTS);
    let y = x.map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() });

    let mut minimizer = Minimizer::new(&x, &y, [1.0, 1.0]);
    minimizer.minimize();
    debug!(
        "fit a = {:.6}, b = {:.6} for min_dist {} spread {} (chi2 {:.3e}, {})",
        minimizer.params[0], minimizer.params[1], min_dist, spread, minimizer.chi2, minimizer.convergence_message
    );
    (minimizer.params[0], minimizer.params[1])
}

/// Levenberg-Marquardt least squares fit of the two parameters of [`curve`].
///
/// Each step solves `[J^T J + lambda diag(J^T J)] delta = J^T (y - f)`, shrinking
/// `lambda` when the step lowers chi2 and growing it otherwise.
pub struct Minimizer<'a> {
    x: &'a Array1<Q>,
    y: &'a Array1<Q>,
    /// Current parameter estimate
    pub params: [Q; 2],
    /// Sum of squared residuals at `params`
    pub chi2: Q,
    /// Why the fit stopped
    pub convergence_message: &'static str,
    lambda: Q,
    max_iterations: usize,
    epsilon_gradient: Q,
    epsilon_parameters: Q,
    epsilon_chi2: Q,
    lambda_up_fac: Q,
    lambda_down_fac: Q,
}

impl<'a> Minimizer<'a> {
    /// Start a fit from `initial` parameters
    pub fn new(x: &'a Array1<Q>, y: &'a Array1<Q>, initial: [Q; 2]) -> Minimizer<'a> {
        let mut m = Minimizer {
            x,
            y,
            params: initial,
            chi2: 0.0,
            convergence_message: "",
            lambda: 1e-3,
            max_iterations: 200,
            epsilon_gradient: 1e-10,
            epsilon_parameters: 1e-10,
            epsilon_chi2: 1e-14,
            lambda_up_fac: 11.0,
            lambda_down_fac: 9.0,
        };
        m.chi2 = m.chi2_at(initial);
        m
    }

    fn chi2_at(&self, p: [Q; 2]) -> Q {
        self.x
            .iter()
            .zip(self.y.iter())
            .map(|(&x, &y)| (y - curve(p[0], p[1], x)).powi(2))
            .sum()
    }

    /// Analytic Jacobian of the curve at `p`, one row per sample
    fn jacobian(&self, p: [Q; 2]) -> Array2<Q> {
        let (a, b) = (p[0], p[1]);
        let mut j = Array2::zeros((self.x.len(), 2));
        for (i, &x) in self.x.iter().enumerate() {
            if x <= 0.0 {
                continue;
            }
            let xp = x.powf(2.0 * b);
            let denom = (1.0 + a * xp).powi(2);
            j[[i, 0]] = -xp / denom;
            j[[i, 1]] = -2.0 * a * xp * x.ln() / denom;
        }
        j
    }

    /// Iterate LM steps until the gradient, the step size or chi2 falls below its tolerance.
    pub fn minimize(&mut self) {
        for _ in 0..self.max_iterations {
            let jac = self.jacobian(self.params);
            let residuals: Array1<Q> = self
                .x
                .iter()
                .zip(self.y.iter())
                .map(|(&x, &y)| y - curve(self.params[0], self.params[1], x))
                .collect();

            let jtj = jac.t().dot(&jac);
            let g = jac.t().dot(&residuals);

            if g.iter().all(|v| v.abs() < self.epsilon_gradient) {
                self.convergence_message = "gradient converged";
                return;
            }

            // solve the damped 2x2 system
            let a00 = jtj[[0, 0]] * (1.0 + self.lambda);
            let a11 = jtj[[1, 1]] * (1.0 + self.lambda);
            let a01 = jtj[[0, 1]];
            let det = a00 * a11 - a01 * a01;
            if det == 0.0 || !det.is_finite() {
                self.lambda *= self.lambda_up_fac;
                continue;
            }
            let delta = [(a11 * g[0] - a01 * g[1]) / det, (a00 * g[1] - a01 * g[0]) / det];
            let candidate = [self.params[0] + delta[0], self.params[1] + delta[1]];
            let candidate_chi2 = self.chi2_at(candidate);

            if candidate_chi2.is_finite() && candidate_chi2 < self.chi2 {
                let improvement = self.chi2 - candidate_chi2;
                self.params = candidate;
                self.chi2 = candidate_chi2;
                self.lambda = (self.lambda / self.lambda_down_fac).max(1e-12);

                let rel_step = delta
                    .iter()
                    .zip(self.params.iter())
                    .map(|(d, p)| (d / p).abs())
                    .fold(0.0, Q::max);
                if rel_step < self.epsilon_parameters {
                    self.convergence_message = "parameters converged";
                    return;
                }
                if improvement < self.epsilon_chi2 {
                    self.convergence_message = "chi2 converged";
                    return;
                }
            } else {
                self.lambda = (self.lambda * self.lambda_up_fac).min(1e12);
            }
        }
        self.convergence_message = "reached max. number of iterations";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ab() {
        // reference values for min_dist = 0.1, spread = 1
        let (a, b) = find_ab_params(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.01, "a = {a}");
        assert!((b - 0.895).abs() < 0.01, "b = {b}");
    }

    #[test]
    fn test_fit_reduces_error() {
        let (a, b) = find_ab_params(1.0, 0.3);
        let x = Array1::linspace(0.0, 3.0, N_POINTS);
        let y = x.map(|&x| if x < 0.3 { 1.0 } else { (-(x - 0.3f64)).exp() });
        let fitted = Minimizer::new(&x, &y, [a, b]).chi2;
        let initial = Minimizer::new(&x, &y, [1.0, 1.0]).chi2;
        assert!(fitted < initial);
        assert!(fitted < 0.1);
    }
}
