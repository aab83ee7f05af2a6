//! Background proposal generation.

use hs_types::{Candidate, HsResult, ObjectiveDirection, SearchSpace};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::acquisition::{AcquisitionContext, AcquisitionFunction};
use crate::bootstrap::BootstrapSampler;
use crate::model::ModelHandle;

/// Proposals produced under one model epoch.
#[derive(Debug, Clone)]
pub(crate) struct ProposalBatch {
    pub epoch: u64,
    pub candidates: Vec<Candidate>,
}

pub(crate) enum GenerationMode {
    Bootstrap(BootstrapSampler),
    Model {
        model: ModelHandle,
        acquisition: Arc<dyn AcquisitionFunction>,
        current_best: f64,
        refitted: bool,
    },
}

impl GenerationMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bootstrap(_) => "bootstrap",
            Self::Model { .. } => "model",
        }
    }
}

/// Owned snapshot handed to one generation task.
pub(crate) struct GenerationJob {
    pub epoch: u64,
    pub mode: GenerationMode,
    pub space: SearchSpace,
    pub direction: ObjectiveDirection,
    pub count: usize,
    pub seed: u64,
}

impl GenerationJob {
    fn run(self) -> HsResult<ProposalBatch> {
        let candidates = match self.mode {
            GenerationMode::Bootstrap(mut sampler) => sampler.suggest(self.count),
            GenerationMode::Model {
                model,
                acquisition,
                current_best,
                refitted,
            } => {
                let ctx = AcquisitionContext {
                    model: model.as_ref(),
                    space: &self.space,
                    current_best,
                    direction: self.direction,
                    refitted,
                    model_epoch: self.epoch,
                    count: self.count,
                    seed: self.seed,
                };
                debug!(
                    acquisition = acquisition.name(),
                    current_best,
                    refitted,
                    count = self.count,
                    "running acquisition"
                );
                acquisition
                    .propose(&ctx)?
                    .iter()
                    .map(|warped| Candidate::new(self.space.warp_out(warped)))
                    .collect()
            }
        };

        Ok(ProposalBatch {
            epoch: self.epoch,
            candidates,
        })
    }
}

/// Spawn the generation. Aborting the returned handle keeps the batch from
/// being published, but a computation already on the blocking pool runs to
/// completion. Every batch is tagged with its epoch so one that was sent
/// before the abort can be told apart.
pub(crate) fn spawn_generation(
    job: GenerationJob,
    proposals: UnboundedSender<ProposalBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let epoch = job.epoch;
        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(Ok(batch)) => {
                let _ = proposals.send(batch);
            }
            Ok(Err(e)) => warn!(error = %e, epoch, "proposal generation failed"),
            Err(e) => error!(error = %e, epoch, "generation task panicked"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Prediction, SurrogateModel};
    use tokio::sync::mpsc;

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
            1
        }
    }

    /// Always proposes the warped corners 0 and 1.
    struct Corners;

    impl AcquisitionFunction for Corners {
        fn propose(&self, ctx: &AcquisitionContext<'_>) -> HsResult<Vec<Vec<f64>>> {
            Ok((0..ctx.count).map(|i| vec![(i % 2) as f64]).collect())
        }

        fn name(&self) -> &str {
            "corners"
        }
    }

    fn space() -> SearchSpace {
        SearchSpace::new().add_float("x", 0.0, 10.0)
    }

    #[tokio::test]
    async fn bootstrap_mode_ignores_model() {
        let sampler = BootstrapSampler::new(space(), Some(5)).unwrap();
        let job = GenerationJob {
            epoch: 0,
            mode: GenerationMode::Bootstrap(sampler),
            space: space(),
            direction: ObjectiveDirection::Minimize,
            count: 4,
            seed: 0,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_generation(job, tx).await.unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.epoch, 0);
        assert_eq!(batch.candidates.len(), 4);
        assert!(batch.candidates.iter().all(|c| (0.0..=10.0).contains(&c.params[0])));
    }

    #[tokio::test]
    async fn model_mode_warps_out_proposals() {
        let job = GenerationJob {
            epoch: 3,
            mode: GenerationMode::Model {
                model: Arc::new(Flat),
                acquisition: Arc::new(Corners),
                current_best: 1.0,
                refitted: true,
            },
            space: space(),
            direction: ObjectiveDirection::Minimize,
            count: 2,
            seed: 0,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_generation(job, tx).await.unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.epoch, 3);
        let raw: Vec<Vec<f64>> = batch.candidates.into_iter().map(|c| c.params).collect();
        assert_eq!(raw, vec![vec![0.0], vec![10.0]]);
    }
}
