//! Background surrogate refit.

use hs_types::{Candidate, KernelConfig, SearchSpace};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::model::{FitInput, ModelFitter, ModelHandle};

/// A fitted model as published by the refit task.
#[derive(Debug, Clone)]
pub(crate) struct RefitOutcome {
    pub model: ModelHandle,
    pub observations: usize,
}

/// Owned snapshot handed to one refit task.
pub(crate) struct RefitJob {
    pub finished: Vec<Candidate>,
    pub space: SearchSpace,
    pub kernel: KernelConfig,
    pub restarts: usize,
    pub seed: u64,
    pub fitter: Arc<dyn ModelFitter>,
}

impl RefitJob {
    fn run(self) -> Option<RefitOutcome> {
        let (design, results): (Vec<Vec<f64>>, Vec<f64>) = self
            .finished
            .iter()
            .filter_map(|c| c.result.map(|r| (self.space.warp_in(&c.params), r)))
            .unzip();

        debug!(
            observations = design.len(),
            fitter = self.fitter.name(),
            "refitting surrogate model"
        );

        let input = FitInput {
            design: &design,
            results: &results,
            kernel: &self.kernel,
            restarts: self.restarts,
            seed: self.seed,
        };
        match self.fitter.fit(input) {
            Ok(model) => Some(RefitOutcome {
                model,
                observations: design.len(),
            }),
            Err(e) => {
                warn!(error = %e, observations = design.len(), "surrogate refit failed");
                None
            }
        }
    }
}

/// Spawn the refit. The fit runs on the blocking pool; aborting the returned
/// handle keeps its outcome from being published, though the fit itself runs
/// to completion.
pub(crate) fn spawn_refit(job: RefitJob, results: UnboundedSender<RefitOutcome>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(Some(outcome)) => {
                // The coordinator may already be gone during shutdown.
                let _ = results.send(outcome);
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "refit task panicked"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GaussianProcessFitter, Prediction, SurrogateModel};
    use hs_types::ModelError;
    use tokio::sync::mpsc;

    fn finished(points: &[(f64, f64)]) -> Vec<Candidate> {
        points
            .iter()
            .map(|(x, y)| Candidate::new(vec![*x]).with_result(*y))
            .collect()
    }

    fn job(fitter: Arc<dyn ModelFitter>) -> RefitJob {
        RefitJob {
            finished: finished(&[(0.0, 5.0), (5.0, 2.0), (10.0, 8.0)]),
            space: SearchSpace::new().add_float("x", 0.0, 10.0),
            kernel: KernelConfig::default(),
            restarts: 3,
            seed: 1,
            fitter,
        }
    }

    #[derive(Debug)]
    struct Flat;

    impl SurrogateModel for Flat {
        fn predict(&self, _point: &[f64]) -> Prediction {
            Prediction {
                mean: 0.0,
                variance: 1.0,
            }
        }

        fn observations(&self) -> usize {
            0
        }
    }

    /// Records the warped design it was given.
    struct Recording(parking_lot::Mutex<Vec<Vec<f64>>>);

    impl ModelFitter for Recording {
        fn fit(&self, input: FitInput<'_>) -> Result<ModelHandle, ModelError> {
            *self.0.lock() = input.design.to_vec();
            Ok(Arc::new(Flat))
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Failing;

    impl ModelFitter for Failing {
        fn fit(&self, input: FitInput<'_>) -> Result<ModelHandle, ModelError> {
            Err(ModelError::NotConverged {
                restarts: input.restarts,
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn publishes_fitted_model() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_refit(job(Arc::new(GaussianProcessFitter)), tx).await.unwrap();
        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.observations, 3);
        assert_eq!(outcome.model.observations(), 3);
    }

    #[tokio::test]
    async fn design_is_warped_before_fitting() {
        let fitter = Arc::new(Recording(parking_lot::Mutex::new(Vec::new())));
        let (tx, _rx) = mpsc::unbounded_channel();
        spawn_refit(job(fitter.clone()), tx).await.unwrap();
        assert_eq!(*fitter.0.lock(), vec![vec![0.0], vec![0.5], vec![1.0]]);
    }

    #[tokio::test]
    async fn failed_fit_publishes_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_refit(job(Arc::new(Failing)), tx);
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
