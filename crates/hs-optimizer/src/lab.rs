//! Registry of independent experiments, each driven by its own coordinator.

use hs_types::{
    internal_error, Candidate, ConfigError, CoordinatorConfig, HsError, HsResult, WorkerReply,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::acquisition::AcquisitionFunction;
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorReport};
use crate::model::ModelFitter;

struct Experiment {
    handle: CoordinatorHandle,
    task: JoinHandle<CoordinatorReport>,
}

/// Named experiments keyed by a caller-chosen string.
#[derive(Default)]
pub struct Lab {
    experiments: HashMap<String, Experiment>,
}

impl Lab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an experiment with the default surrogate stack.
    pub fn init_experiment(&mut self, name: &str, config: CoordinatorConfig) -> HsResult<()> {
        self.ensure_vacant(name)?;
        let (coordinator, handle) = Coordinator::from_config(named(config, name))?;
        self.spawn(name, coordinator, handle);
        Ok(())
    }

    /// Start an experiment with a caller-supplied fitter and acquisition.
    pub fn init_experiment_with(
        &mut self,
        name: &str,
        config: CoordinatorConfig,
        fitter: Arc<dyn ModelFitter>,
        acquisition: Arc<dyn AcquisitionFunction>,
    ) -> HsResult<()> {
        self.ensure_vacant(name)?;
        let (coordinator, handle) =
            Coordinator::new(named(config, name), fitter, acquisition)?;
        self.spawn(name, coordinator, handle);
        Ok(())
    }

    pub fn handle(&self, name: &str) -> HsResult<&CoordinatorHandle> {
        self.experiments
            .get(name)
            .map(|e| &e.handle)
            .ok_or_else(|| HsError::UnknownExperiment {
                name: name.to_string(),
            })
    }

    pub async fn next_candidate(&self, name: &str) -> HsResult<Candidate> {
        self.handle(name)?.request_next_candidate().await
    }

    pub async fn update(&self, name: &str, candidate: Candidate, status: &str) -> HsResult<WorkerReply> {
        self.handle(name)?
            .report_status(candidate, status, None, false)
            .await
    }

    /// Best finished candidate as of the experiment's last loop iteration.
    pub fn best_candidate(&self, name: &str) -> HsResult<Option<Candidate>> {
        Ok(self.handle(name)?.snapshot().best)
    }

    pub fn experiment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.experiments.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop one experiment and wait for its final report.
    pub async fn shutdown(&mut self, name: &str) -> HsResult<CoordinatorReport> {
        let experiment = self
            .experiments
            .remove(name)
            .ok_or_else(|| HsError::UnknownExperiment {
                name: name.to_string(),
            })?;
        experiment.handle.shutdown();
        experiment
            .task
            .await
            .map_err(|e| internal_error!("coordinator for '{}' failed: {}", name, e))
    }

    pub async fn shutdown_all(&mut self) -> HsResult<HashMap<String, CoordinatorReport>> {
        let mut reports = HashMap::new();
        for name in self.experiment_names() {
            let report = self.shutdown(&name).await?;
            reports.insert(name, report);
        }
        Ok(reports)
    }

    fn ensure_vacant(&self, name: &str) -> HsResult<()> {
        if self.experiments.contains_key(name) {
            return Err(ConfigError::DuplicateExperiment {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn spawn(&mut self, name: &str, coordinator: Coordinator, handle: CoordinatorHandle) {
        info!(experiment = name, experiment_id = %handle.experiment_id(), "starting experiment");
        let task = tokio::spawn(coordinator.run());
        self.experiments
            .insert(name.to_string(), Experiment { handle, task });
    }
}

/// Experiments without an explicit name take their registry key.
fn named(mut config: CoordinatorConfig, name: &str) -> CoordinatorConfig {
    if config.name.is_empty() {
        config.name = name.to_string();
    }
    config
}
