//! The coordinator loop.
//!
//! One [`Coordinator`] owns every candidate list and all scheduling state. It
//! talks to workers through a [`CoordinatorHandle`] and to its two background
//! tasks (refit, generation) through mpsc channels. Each iteration, in order:
//!
//! 1. adopt any freshly fitted model and purge everything proposed before it,
//! 2. apply worker reports,
//! 3. launch a refit if one was requested and none is running,
//! 4. publish generated proposals that belong to the current model epoch,
//! 5. launch generation if the offer backlog is below the low-water-mark.

use chrono::{DateTime, Utc};
use hs_types::{
    Candidate, CoordinatorConfig, ExperimentId, HsError, HsResult, ProtocolError, WorkerReply,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::acquisition::{build_acquisition, AcquisitionFunction};
use crate::book::{CandidateBook, Transition};
use crate::bootstrap::BootstrapSampler;
use crate::generation::{spawn_generation, GenerationJob, GenerationMode, ProposalBatch};
use crate::model::{GaussianProcessFitter, ModelFitter, ModelHandle};
use crate::offer::OfferChannel;
use crate::refit::{spawn_refit, RefitJob, RefitOutcome};

/// A worker report waiting to be applied by the loop.
#[derive(Debug)]
struct StatusUpdate {
    candidate: Candidate,
    status: String,
    worker_id: Option<String>,
    can_be_killed: bool,
    reply: oneshot::Sender<WorkerReply>,
}

/// Point-in-time view of a coordinator, refreshed every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub experiment_id: ExperimentId,
    pub pending: usize,
    pub working: usize,
    pub finished: usize,
    /// Candidates currently waiting in the offer channel.
    pub offered: usize,
    pub best: Option<Candidate>,
    pub model_epoch: u64,
    pub refit_requested: bool,
    pub refit_running: bool,
    pub generation_running: bool,
    pub protocol_errors: u64,
    pub iterations: u64,
    pub updated_at: DateTime<Utc>,
}

/// Final state returned when the loop terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorReport {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub finished: Vec<Candidate>,
    pub best: Option<Candidate>,
    pub models_adopted: u64,
    pub refits_launched: u64,
    pub generations_launched: u64,
    pub protocol_errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What a single [`Coordinator::step`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    pub models_adopted: usize,
    pub reports_handled: usize,
    pub refit_launched: bool,
    pub proposals_accepted: usize,
    pub proposals_discarded: usize,
    pub generation_launched: bool,
}

/// Scheduling flags. Only the loop reads or writes these.
#[derive(Debug, Default)]
struct LoopState {
    model: Option<ModelHandle>,
    /// Incremented on every adopted model; proposals carry the epoch they
    /// were generated under.
    model_epoch: u64,
    just_refitted: bool,
    refit_requested: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    refits_launched: u64,
    generations_launched: u64,
    protocol_errors: u64,
    iterations: u64,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    book: CandidateBook,
    sampler: BootstrapSampler,
    rng: StdRng,
    fitter: Arc<dyn ModelFitter>,
    acquisition: Arc<dyn AcquisitionFunction>,
    state: LoopState,
    counters: Counters,
    offers: OfferChannel,
    status_rx: mpsc::UnboundedReceiver<StatusUpdate>,
    refit_tx: mpsc::UnboundedSender<RefitOutcome>,
    refit_rx: mpsc::UnboundedReceiver<RefitOutcome>,
    proposal_tx: mpsc::UnboundedSender<ProposalBatch>,
    proposal_rx: mpsc::UnboundedReceiver<ProposalBatch>,
    refit_task: Option<JoinHandle<()>>,
    generation_task: Option<JoinHandle<()>>,
    shutdown_rx: watch::Receiver<bool>,
    snapshot_tx: watch::Sender<CoordinatorSnapshot>,
    started_at: DateTime<Utc>,
}

impl Coordinator {
    /// Build a coordinator with the default Gaussian-process fitter and the
    /// configured acquisition function.
    pub fn from_config(config: CoordinatorConfig) -> HsResult<(Self, CoordinatorHandle)> {
        let acquisition = build_acquisition(&config.acquisition);
        Self::new(config, Arc::new(GaussianProcessFitter), acquisition)
    }

    /// Validate the configuration and prefill the offer channel with
    /// `bootstrap_count` random candidates.
    pub fn new(
        config: CoordinatorConfig,
        fitter: Arc<dyn ModelFitter>,
        acquisition: Arc<dyn AcquisitionFunction>,
    ) -> HsResult<(Self, CoordinatorHandle)> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut sampler = BootstrapSampler::new(config.search_space.clone(), Some(rng.random()))?;

        let mut book = CandidateBook::new(config.direction);
        let offers = OfferChannel::new();
        for candidate in sampler.suggest(config.bootstrap_count) {
            if book.push_pending(candidate.clone()) {
                offers.push_back(candidate);
            }
        }

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (refit_tx, refit_rx) = mpsc::unbounded_channel();
        let (proposal_tx, proposal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut coordinator = Self {
            config,
            book,
            sampler,
            rng,
            fitter,
            acquisition,
            state: LoopState::default(),
            counters: Counters::default(),
            offers: offers.clone(),
            status_rx,
            refit_tx,
            refit_rx,
            proposal_tx,
            proposal_rx,
            refit_task: None,
            generation_task: None,
            shutdown_rx,
            // Replaced below once the coordinator can describe itself.
            snapshot_tx: watch::channel(CoordinatorSnapshot::empty()).0,
            started_at: Utc::now(),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(coordinator.snapshot());
        coordinator.snapshot_tx = snapshot_tx;

        info!(
            experiment = %coordinator.config.name,
            experiment_id = %coordinator.config.experiment_id,
            dimensions = coordinator.config.search_space.dimensions(),
            bootstrap = coordinator.config.bootstrap_count,
            low_water_mark = coordinator.config.pending_low_water_mark,
            fitter = coordinator.fitter.name(),
            acquisition = coordinator.acquisition.name(),
            "coordinator initialized"
        );

        let handle = CoordinatorHandle {
            experiment_id: coordinator.config.experiment_id,
            offers,
            status_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            snapshot_rx,
        };
        Ok((coordinator, handle))
    }

    /// Drive the loop until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) -> CoordinatorReport {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.shutdown_requested() {
                break;
            }
            self.step();
        }

        self.terminate()
    }

    /// One loop iteration without the cancellation check. Spawns background
    /// tasks, so it must be called from within a tokio runtime.
    pub fn step(&mut self) -> StepSummary {
        let (adopted, purged) = self.drain_refits();
        let mut summary = StepSummary {
            models_adopted: adopted,
            ..StepSummary::default()
        };

        summary.reports_handled = self.drain_status_updates();
        summary.refit_launched = self.maybe_launch_refit();

        let (accepted, discarded) = self.drain_proposals();
        summary.proposals_accepted = accepted;
        summary.proposals_discarded = purged + discarded;

        summary.generation_launched = self.maybe_launch_generation();

        self.counters.iterations += 1;
        self.snapshot_tx.send_replace(self.snapshot());
        summary
    }

    /// Apply one worker report and return the reply for that worker.
    pub fn report(
        &mut self,
        candidate: Candidate,
        status: &str,
        worker_id: Option<&str>,
        can_be_killed: bool,
    ) -> WorkerReply {
        let worker = worker_id.unwrap_or("anonymous");
        debug!(worker, status, can_be_killed, candidate = %candidate, "worker report");

        let transition = self.book.report(candidate, status);
        match &transition {
            Transition::Finished { improved } => {
                let finished = self.book.finished().len();
                if finished >= self.config.bootstrap_count {
                    self.state.refit_requested = true;
                }
                if *improved {
                    info!(
                        worker,
                        result = ?self.book.best().and_then(|c| c.result),
                        finished,
                        "new best candidate"
                    );
                }
            }
            Transition::Paused(candidate) => {
                debug!(worker, candidate = %candidate, "re-offering paused candidate");
                self.offers.promote(candidate.clone());
            }
            Transition::Renewed => {}
            Transition::Rejected(err) => {
                self.counters.protocol_errors += 1;
                match err {
                    ProtocolError::UnrecognizedStatus { .. } | ProtocolError::MissingResult { .. } => {
                        error!(worker, error = %err, "worker protocol violation")
                    }
                    ProtocolError::AlreadyFinished { .. } | ProtocolError::UnknownCandidate { .. } => {
                        warn!(worker, error = %err, "rejected worker report")
                    }
                }
            }
        }
        transition.reply()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow() || self.shutdown_rx.has_changed().is_err()
    }

    /// Returns the number of adopted models and of in-flight proposals
    /// dropped with the models they were generated under.
    fn drain_refits(&mut self) -> (usize, usize) {
        let (mut adopted, mut purged) = (0, 0);
        while let Ok(outcome) = self.refit_rx.try_recv() {
            purged += self.adopt_model(outcome);
            adopted += 1;
        }
        (adopted, purged)
    }

    /// Make `outcome` the current model and invalidate everything proposed
    /// under the previous one.
    fn adopt_model(&mut self, outcome: RefitOutcome) -> usize {
        self.state.model = Some(outcome.model);
        self.state.model_epoch += 1;
        self.state.just_refitted = true;

        if let Some(task) = &self.generation_task {
            task.abort();
        }
        let mut in_flight = 0;
        while let Ok(batch) = self.proposal_rx.try_recv() {
            in_flight += batch.candidates.len();
        }
        let offered = self.offers.purge();
        let pending = self.book.clear_pending();

        info!(
            model_epoch = self.state.model_epoch,
            observations = outcome.observations,
            purged_pending = pending,
            purged_offers = offered,
            purged_in_flight = in_flight,
            "adopted refreshed surrogate model"
        );
        in_flight
    }

    fn drain_status_updates(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(update) = self.status_rx.try_recv() {
            let StatusUpdate {
                candidate,
                status,
                worker_id,
                can_be_killed,
                reply,
            } = update;
            let answer = self.report(candidate, &status, worker_id.as_deref(), can_be_killed);
            // The worker may have given up waiting.
            let _ = reply.send(answer);
            handled += 1;
        }
        handled
    }

    fn maybe_launch_refit(&mut self) -> bool {
        if !self.state.refit_requested || self.is_refit_running() {
            return false;
        }
        self.state.refit_requested = false;

        let job = RefitJob {
            finished: self.book.finished().to_vec(),
            space: self.config.search_space.clone(),
            kernel: self.config.kernel.clone(),
            restarts: self.config.refit_restarts,
            seed: self.rng.random(),
            fitter: Arc::clone(&self.fitter),
        };
        info!(observations = job.finished.len(), "launching surrogate refit");
        self.refit_task = Some(spawn_refit(job, self.refit_tx.clone()));
        self.counters.refits_launched += 1;
        true
    }

    fn drain_proposals(&mut self) -> (usize, usize) {
        let (mut accepted, mut discarded) = (0, 0);
        while let Ok(batch) = self.proposal_rx.try_recv() {
            if batch.epoch != self.state.model_epoch {
                debug!(
                    batch_epoch = batch.epoch,
                    model_epoch = self.state.model_epoch,
                    count = batch.candidates.len(),
                    "discarding stale proposals"
                );
                discarded += batch.candidates.len();
                continue;
            }
            for candidate in batch.candidates {
                if self.book.push_pending(candidate.clone()) {
                    self.offers.push_back(candidate);
                    accepted += 1;
                } else {
                    discarded += 1;
                }
            }
        }
        (accepted, discarded)
    }

    fn maybe_launch_generation(&mut self) -> bool {
        let backlog = self.offers.len();
        let low_water_mark = self.config.pending_low_water_mark;
        if (backlog > 0 && backlog >= low_water_mark) || self.is_generation_running() {
            return false;
        }

        let model_driven = match (&self.state.model, self.book.best().and_then(|c| c.result)) {
            (Some(model), Some(best)) if self.book.finished().len() >= self.config.bootstrap_count => {
                Some((Arc::clone(model), best))
            }
            _ => None,
        };

        let (mode, count) = match model_driven {
            Some((model, current_best)) => {
                let refitted = std::mem::take(&mut self.state.just_refitted);
                let mode = GenerationMode::Model {
                    model,
                    acquisition: Arc::clone(&self.acquisition),
                    current_best,
                    refitted,
                };
                (mode, self.config.num_precomputed + 1)
            }
            None => (
                GenerationMode::Bootstrap(self.sampler.fork()),
                low_water_mark.saturating_sub(backlog).max(1),
            ),
        };

        debug!(
            mode = mode.label(),
            count,
            backlog,
            model_epoch = self.state.model_epoch,
            "launching proposal generation"
        );
        let job = GenerationJob {
            epoch: self.state.model_epoch,
            mode,
            space: self.config.search_space.clone(),
            direction: self.config.direction,
            count,
            seed: self.rng.random(),
        };
        self.generation_task = Some(spawn_generation(job, self.proposal_tx.clone()));
        self.counters.generations_launched += 1;
        true
    }

    fn abort_background_tasks(&mut self) {
        // Aborting a task that already exited is a no-op.
        if let Some(task) = self.generation_task.take() {
            task.abort();
        }
        if let Some(task) = self.refit_task.take() {
            task.abort();
        }
    }

    fn terminate(&mut self) -> CoordinatorReport {
        self.abort_background_tasks();
        self.offers.close();
        self.snapshot_tx.send_replace(self.snapshot());

        let report = CoordinatorReport {
            experiment_id: self.config.experiment_id,
            name: self.config.name.clone(),
            finished: self.book.finished().to_vec(),
            best: self.book.best().cloned(),
            models_adopted: self.state.model_epoch,
            refits_launched: self.counters.refits_launched,
            generations_launched: self.counters.generations_launched,
            protocol_errors: self.counters.protocol_errors,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        info!(
            experiment = %report.name,
            finished = report.finished.len(),
            best = ?report.best.as_ref().and_then(|c| c.result),
            iterations = self.counters.iterations,
            "coordinator terminated"
        );
        report
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            experiment_id: self.config.experiment_id,
            pending: self.book.pending().len(),
            working: self.book.working().len(),
            finished: self.book.finished().len(),
            offered: self.offers.len(),
            best: self.book.best().cloned(),
            model_epoch: self.state.model_epoch,
            refit_requested: self.state.refit_requested,
            refit_running: self.is_refit_running(),
            generation_running: self.is_generation_running(),
            protocol_errors: self.counters.protocol_errors,
            iterations: self.counters.iterations,
            updated_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn book(&self) -> &CandidateBook {
        &self.book
    }

    pub fn offers(&self) -> &OfferChannel {
        &self.offers
    }

    pub fn current_model(&self) -> Option<&ModelHandle> {
        self.state.model.as_ref()
    }

    pub fn model_epoch(&self) -> u64 {
        self.state.model_epoch
    }

    pub fn refit_requested(&self) -> bool {
        self.state.refit_requested
    }

    pub fn is_refit_running(&self) -> bool {
        self.refit_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn is_generation_running(&self) -> bool {
        self.generation_task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.abort_background_tasks();
    }
}

impl CoordinatorSnapshot {
    fn empty() -> Self {
        Self {
            experiment_id: ExperimentId::nil(),
            pending: 0,
            working: 0,
            finished: 0,
            offered: 0,
            best: None,
            model_epoch: 0,
            refit_requested: false,
            refit_running: false,
            generation_running: false,
            protocol_errors: 0,
            iterations: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Worker-facing side of a coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    experiment_id: ExperimentId,
    offers: OfferChannel,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    snapshot_rx: watch::Receiver<CoordinatorSnapshot>,
}

impl CoordinatorHandle {
    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Wait for the next offered candidate.
    pub async fn request_next_candidate(&self) -> HsResult<Candidate> {
        self.offers.pop().await.ok_or(HsError::CoordinatorStopped)
    }

    pub fn try_request_next_candidate(&self) -> Option<Candidate> {
        self.offers.try_pop()
    }

    /// Report progress on `candidate`. Resolves once the loop has applied the
    /// report.
    pub async fn report_status(
        &self,
        candidate: Candidate,
        status: &str,
        worker_id: Option<&str>,
        can_be_killed: bool,
    ) -> HsResult<WorkerReply> {
        let (reply, answer) = oneshot::channel();
        self.status_tx
            .send(StatusUpdate {
                candidate,
                status: status.to_string(),
                worker_id: worker_id.map(str::to_string),
                can_be_killed,
                reply,
            })
            .map_err(|_| HsError::CoordinatorStopped)?;
        answer.await.map_err(|_| HsError::CoordinatorStopped)
    }

    /// State as of the last completed loop iteration.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait until the next iteration publishes a snapshot.
    pub async fn changed(&mut self) -> HsResult<CoordinatorSnapshot> {
        self.snapshot_rx
            .changed()
            .await
            .map_err(|_| HsError::CoordinatorStopped)?;
        Ok(self.snapshot_rx.borrow_and_update().clone())
    }

    /// Ask the loop to terminate at the start of its next iteration.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
