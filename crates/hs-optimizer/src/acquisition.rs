//! Acquisition functions: turn a surrogate model into proposal points.
//!
//! Both built-in functions optimise by random search: a pool of uniformly
//! drawn warped points is scored in parallel and the best `count` are
//! returned. While the model is unchanged (`refitted == false`, same
//! `model_epoch`) the ranked pool is reused and consecutive calls walk further
//! down the ranking instead of returning the same points again. A pool is
//! never reused across model epochs.

use hs_types::{AcquisitionConfig, AcquisitionKind, HsError, HsResult, ObjectiveDirection, SearchSpace};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;

use crate::model::{Prediction, SurrogateModel};

/// Inputs for one proposal round.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionContext<'a> {
    pub model: &'a dyn SurrogateModel,
    pub space: &'a SearchSpace,
    /// Best finished result so far.
    pub current_best: f64,
    pub direction: ObjectiveDirection,
    /// Whether the model changed since the previous round.
    pub refitted: bool,
    /// Epoch of `model`; increases with every adopted model.
    pub model_epoch: u64,
    pub count: usize,
    pub seed: u64,
}

/// Proposes warped points to evaluate next.
pub trait AcquisitionFunction: Send + Sync {
    /// Returns up to `ctx.count` points in warped space.
    fn propose(&self, ctx: &AcquisitionContext<'_>) -> HsResult<Vec<Vec<f64>>>;

    fn name(&self) -> &str;
}

/// Build the configured acquisition function.
pub fn build_acquisition(config: &AcquisitionConfig) -> Arc<dyn AcquisitionFunction> {
    match config.kind {
        AcquisitionKind::ExpectedImprovement => {
            Arc::new(ExpectedImprovement::new(config.exploration, config.samples))
        }
        AcquisitionKind::ProbabilityOfImprovement => {
            Arc::new(ProbabilityOfImprovement::new(config.exploration, config.samples))
        }
    }
}

// ---------- normal distribution helpers ----------

/// Standard normal cumulative distribution function (Abramowitz & Stegun 26.2.17).
fn norm_cdf(x: f64) -> f64 {
    if x >= 8.0 {
        return 1.0;
    }
    if x <= -8.0 {
        return 0.0;
    }

    let a1 = 0.254829592_f64;
    let a2 = -0.284496736_f64;
    let a3 = 1.421413741_f64;
    let a4 = -1.453152027_f64;
    let a5 = 1.061405429_f64;
    let p = 0.3275911_f64;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x_abs = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + p * x_abs);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x_abs * x_abs).exp();

    0.5 * (1.0 + sign * y)
}

/// Standard normal probability density function.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Signed improvement of the predicted mean over the incumbent, so that
/// larger is always better regardless of direction.
fn improvement(prediction: &Prediction, best: f64, direction: ObjectiveDirection, xi: f64) -> f64 {
    match direction {
        ObjectiveDirection::Minimize => best - prediction.mean - xi,
        ObjectiveDirection::Maximize => prediction.mean - best - xi,
    }
}

fn expected_improvement(prediction: &Prediction, best: f64, direction: ObjectiveDirection, xi: f64) -> f64 {
    let sigma = prediction.std_dev();
    let gain = improvement(prediction, best, direction, xi);
    if sigma < 1e-10 {
        return gain.max(0.0);
    }
    let z = gain / sigma;
    (gain * norm_cdf(z) + sigma * norm_pdf(z)).max(0.0)
}

fn probability_of_improvement(
    prediction: &Prediction,
    best: f64,
    direction: ObjectiveDirection,
    xi: f64,
) -> f64 {
    let sigma = prediction.std_dev();
    let gain = improvement(prediction, best, direction, xi);
    if sigma < 1e-10 {
        return if gain > 0.0 { 1.0 } else { 0.0 };
    }
    norm_cdf(gain / sigma)
}

/// Ranked pool of scored points kept between rounds of the same model.
#[derive(Debug, Default)]
struct RankedPool {
    points: Vec<Vec<f64>>,
    cursor: usize,
    /// Model epoch the ranking was scored under.
    epoch: Option<u64>,
}

/// Shared random-search machinery for score-based acquisition functions.
#[derive(Debug)]
struct RandomSearchOptimizer {
    samples: usize,
    pool: Mutex<RankedPool>,
}

impl RandomSearchOptimizer {
    fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
            pool: Mutex::new(RankedPool::default()),
        }
    }

    fn propose<F>(&self, ctx: &AcquisitionContext<'_>, score: F) -> Vec<Vec<f64>>
    where
        F: Fn(&Prediction) -> f64 + Sync,
    {
        let mut pool = self.pool.lock();

        // A job for a superseded model may still be running on the blocking
        // pool; it must not replace the ranking of a newer model.
        if pool.epoch.is_some_and(|epoch| ctx.model_epoch < epoch) {
            drop(pool);
            let mut points = self.rank(ctx, &score);
            points.truncate(ctx.count);
            return points;
        }

        let stale = pool.epoch != Some(ctx.model_epoch);
        let exhausted = pool.cursor + ctx.count > pool.points.len();
        if ctx.refitted || stale || exhausted {
            pool.points = self.rank(ctx, &score);
            pool.cursor = 0;
            pool.epoch = Some(ctx.model_epoch);
        }

        let end = (pool.cursor + ctx.count).min(pool.points.len());
        let batch = pool.points[pool.cursor..end].to_vec();
        pool.cursor = end;
        batch
    }

    /// Draw a fresh sample and sort it best first.
    fn rank<F>(&self, ctx: &AcquisitionContext<'_>, score: &F) -> Vec<Vec<f64>>
    where
        F: Fn(&Prediction) -> f64 + Sync,
    {
        let mut rng = StdRng::seed_from_u64(ctx.seed);
        let dims = ctx.space.dimensions();
        let points: Vec<Vec<f64>> = (0..self.samples.max(ctx.count))
            .map(|_| (0..dims).map(|_| rng.random_range(0.0..=1.0)).collect())
            .collect();

        let mut scored: Vec<(f64, Vec<f64>)> = points
            .into_par_iter()
            .map(|point| {
                let value = score(&ctx.model.predict(&point));
                (if value.is_finite() { value } else { f64::NEG_INFINITY }, point)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, point)| point).collect()
    }
}

/// Expected Improvement over the current best result.
#[derive(Debug)]
pub struct ExpectedImprovement {
    exploration: f64,
    optimizer: RandomSearchOptimizer,
}

impl ExpectedImprovement {
    pub fn new(exploration: f64, samples: usize) -> Self {
        Self {
            exploration,
            optimizer: RandomSearchOptimizer::new(samples),
        }
    }
}

impl AcquisitionFunction for ExpectedImprovement {
    fn propose(&self, ctx: &AcquisitionContext<'_>) -> HsResult<Vec<Vec<f64>>> {
        if !ctx.current_best.is_finite() {
            return Err(HsError::Acquisition(format!(
                "current best result is not finite: {}",
                ctx.current_best
            )));
        }
        let (best, direction, xi) = (ctx.current_best, ctx.direction, self.exploration);
        Ok(self
            .optimizer
            .propose(ctx, |p| expected_improvement(p, best, direction, xi)))
    }

    fn name(&self) -> &str {
        "expected_improvement"
    }
}

/// Probability of Improvement over the current best result.
#[derive(Debug)]
pub struct ProbabilityOfImprovement {
    exploration: f64,
    optimizer: RandomSearchOptimizer,
}

impl ProbabilityOfImprovement {
    pub fn new(exploration: f64, samples: usize) -> Self {
        Self {
            exploration,
            optimizer: RandomSearchOptimizer::new(samples),
        }
    }
}

impl AcquisitionFunction for ProbabilityOfImprovement {
    fn propose(&self, ctx: &AcquisitionContext<'_>) -> HsResult<Vec<Vec<f64>>> {
        if !ctx.current_best.is_finite() {
            return Err(HsError::Acquisition(format!(
                "current best result is not finite: {}",
                ctx.current_best
            )));
        }
        let (best, direction, xi) = (ctx.current_best, ctx.direction, self.exploration);
        Ok(self
            .optimizer
            .propose(ctx, |p| probability_of_improvement(p, best, direction, xi)))
    }

    fn name(&self) -> &str {
        "probability_of_improvement"
    }
}
