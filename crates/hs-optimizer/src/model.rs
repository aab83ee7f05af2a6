//! Surrogate model interface and the default Gaussian-process implementation.

use hs_types::{KernelConfig, KernelFamily, ModelError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Predictive distribution at a single warped point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub variance: f64,
}

impl Prediction {
    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

/// A fitted regression model over warped parameter vectors.
pub trait SurrogateModel: Send + Sync + fmt::Debug {
    fn predict(&self, point: &[f64]) -> Prediction;

    /// Number of observations the model was fitted on.
    fn observations(&self) -> usize;
}

/// Opaque, shareable handle to the current surrogate model.
pub type ModelHandle = Arc<dyn SurrogateModel>;

/// Everything a fitter needs. `design` rows are already warped.
#[derive(Debug, Clone, Copy)]
pub struct FitInput<'a> {
    pub design: &'a [Vec<f64>],
    pub results: &'a [f64],
    pub kernel: &'a KernelConfig,
    pub restarts: usize,
    pub seed: u64,
}

/// Fits a surrogate model. Called from the refit task on the blocking pool.
pub trait ModelFitter: Send + Sync {
    fn fit(&self, input: FitInput<'_>) -> Result<ModelHandle, ModelError>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Gaussian process
// ---------------------------------------------------------------------------

/// Fits a zero-mean GP on standardized results, choosing lengthscale and noise
/// within the configured bounds by maximum marginal likelihood over random
/// restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianProcessFitter;

impl ModelFitter for GaussianProcessFitter {
    fn fit(&self, input: FitInput<'_>) -> Result<ModelHandle, ModelError> {
        let gp = GaussianProcess::fit(input)?;
        Ok(Arc::new(gp))
    }

    fn name(&self) -> &str {
        "gaussian_process"
    }
}

#[derive(Debug, Clone)]
pub struct GaussianProcess {
    family: KernelFamily,
    lengthscale: f64,
    noise: f64,
    x_train: Vec<Vec<f64>>,
    y_mean: f64,
    y_scale: f64,
    /// K^{-1} y on standardized targets.
    alpha: Vec<f64>,
    /// Lower Cholesky factor of K + noise * I.
    l_matrix: Vec<Vec<f64>>,
    log_likelihood: f64,
}

impl GaussianProcess {
    pub fn fit(input: FitInput<'_>) -> Result<Self, ModelError> {
        let FitInput {
            design,
            results,
            kernel,
            restarts,
            seed,
        } = input;

        if design.is_empty() {
            return Err(ModelError::EmptyDesign);
        }
        if design.len() != results.len() {
            return Err(ModelError::LengthMismatch {
                rows: design.len(),
                results: results.len(),
            });
        }
        let dims = design[0].len();
        if let Some(row) = design.iter().find(|row| row.len() != dims) {
            return Err(ModelError::DimensionMismatch {
                expected: dims,
                actual: row.len(),
            });
        }
        if design.iter().flatten().chain(results).any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }

        let n = results.len() as f64;
        let y_mean = results.iter().sum::<f64>() / n;
        let variance = results.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n;
        let y_scale = if variance > 1e-12 { variance.sqrt() } else { 1.0 };
        let y: Vec<f64> = results.iter().map(|r| (r - y_mean) / y_scale).collect();

        // First attempt sits at the geometric midpoint of the bounds.
        let mut rng = StdRng::seed_from_u64(seed);
        let mut best: Option<Self> = None;
        for attempt in 0..=restarts {
            let (lengthscale, noise) = if attempt == 0 {
                (
                    geometric_mid(kernel.lengthscale_bounds),
                    geometric_mid(kernel.noise_bounds),
                )
            } else {
                (
                    log_uniform(&mut rng, kernel.lengthscale_bounds),
                    log_uniform(&mut rng, kernel.noise_bounds),
                )
            };

            match Self::condition(kernel.family, lengthscale, noise, design, &y) {
                Some(mut gp) => {
                    gp.y_mean = y_mean;
                    gp.y_scale = y_scale;
                    if best
                        .as_ref()
                        .map_or(true, |b| gp.log_likelihood > b.log_likelihood)
                    {
                        best = Some(gp);
                    }
                }
                None => debug!(attempt, lengthscale, noise, "cholesky failed, skipping restart"),
            }
        }

        let gp = best.ok_or(ModelError::NotConverged { restarts })?;
        debug!(
            lengthscale = gp.lengthscale,
            noise = gp.noise,
            log_likelihood = gp.log_likelihood,
            observations = gp.x_train.len(),
            "fitted gaussian process"
        );
        Ok(gp)
    }

    /// Condition the GP on standardized targets for fixed hyperparameters.
    fn condition(
        family: KernelFamily,
        lengthscale: f64,
        noise: f64,
        design: &[Vec<f64>],
        y: &[f64],
    ) -> Option<Self> {
        let n = design.len();
        let mut k_matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let k = kernel(family, lengthscale, &design[i], &design[j]);
                k_matrix[i][j] = k;
                k_matrix[j][i] = k;
            }
            k_matrix[i][i] += noise;
        }

        let l = cholesky(&k_matrix)?;
        let z = solve_triangular(&l, y, false);
        let alpha = solve_triangular(&l, &z, true);

        let data_fit: f64 = y.iter().zip(&alpha).map(|(a, b)| a * b).sum();
        let log_det: f64 = (0..n).map(|i| l[i][i].ln()).sum();
        let log_likelihood =
            -0.5 * data_fit - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        Some(Self {
            family,
            lengthscale,
            noise,
            x_train: design.to_vec(),
            y_mean: 0.0,
            y_scale: 1.0,
            alpha,
            l_matrix: l,
            log_likelihood,
        })
    }

    pub fn lengthscale(&self) -> f64 {
        self.lengthscale
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
}

impl SurrogateModel for GaussianProcess {
    fn predict(&self, point: &[f64]) -> Prediction {
        let k_star: Vec<f64> = self
            .x_train
            .iter()
            .map(|xi| kernel(self.family, self.lengthscale, xi, point))
            .collect();

        let mean: f64 = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();

        let v = solve_triangular(&self.l_matrix, &k_star, false);
        let k_xx = kernel(self.family, self.lengthscale, point, point);
        let variance = (k_xx - v.iter().map(|vi| vi * vi).sum::<f64>()).max(1e-12);

        Prediction {
            mean: mean * self.y_scale + self.y_mean,
            variance: variance * self.y_scale * self.y_scale,
        }
    }

    fn observations(&self) -> usize {
        self.x_train.len()
    }
}

fn kernel(family: KernelFamily, lengthscale: f64, a: &[f64], b: &[f64]) -> f64 {
    let sq_dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    match family {
        KernelFamily::Rbf => (-sq_dist / (2.0 * lengthscale * lengthscale)).exp(),
        KernelFamily::Matern52 => {
            let r = sq_dist.sqrt() / lengthscale;
            let s5 = 5f64.sqrt() * r;
            (1.0 + s5 + 5.0 * r * r / 3.0) * (-s5).exp()
        }
    }
}

fn geometric_mid((low, high): (f64, f64)) -> f64 {
    (low * high).sqrt()
}

fn log_uniform(rng: &mut StdRng, (low, high): (f64, f64)) -> f64 {
    if low >= high {
        return low;
    }
    rng.random_range(low.ln()..high.ln()).exp()
}

/// Lower Cholesky factor, or `None` if the matrix is not positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let val = matrix[i][i] - sum;
                if val <= 0.0 || !val.is_finite() {
                    return None;
                }
                l[i][j] = val.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }

    Some(l)
}

/// Solve `L x = b`, or `L^T x = b` when `transpose` is set.
fn solve_triangular(l: &[Vec<f64>], b: &[f64], transpose: bool) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];

    if transpose {
        for i in (0..n).rev() {
            let mut sum = b[i];
            for j in (i + 1)..n {
                sum -= l[j][i] * x[j];
            }
            x[i] = sum / l[i][i];
        }
    } else {
        for i in 0..n {
            let mut sum = b[i];
            for j in 0..i {
                sum -= l[i][j] * x[j];
            }
            x[i] = sum / l[i][i];
        }
    }

    x
}
