mod objectives;

use anyhow::{bail, Context};
use hs_optimizer::{Coordinator, CoordinatorHandle};
use hs_types::{CoordinatorConfig, HsError, WorkerReply};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::objectives::{branin, branin_space, BRANIN_MINIMUM};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn load_config() -> anyhow::Result<CoordinatorConfig> {
    let config = match std::env::var("HYPERSEARCH_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading coordinator config from {path}"))?;
            CoordinatorConfig::from_json(&json)?
        }
        Err(_) => CoordinatorConfig::new("branin", branin_space())
            .with_bootstrap_count(8)
            .with_low_water_mark(4),
    };
    if config.search_space.dimensions() != 2 {
        bail!(
            "the branin objective needs a two-dimensional space, got {}",
            config.search_space.dimensions()
        );
    }
    Ok(config)
}

/// Pull candidates until the shared budget is spent or the coordinator stops.
async fn worker(id: usize, handle: CoordinatorHandle, budget: Arc<AtomicUsize>) -> anyhow::Result<usize> {
    let worker_id = format!("worker-{id}");
    let mut evaluated = 0;

    while budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
    {
        let candidate = match handle.request_next_candidate().await {
            Ok(candidate) => candidate,
            Err(HsError::CoordinatorStopped) => break,
            Err(e) => return Err(e.into()),
        };

        let reply = handle
            .report_status(candidate.clone(), "working", Some(worker_id.as_str()), true)
            .await?;
        if reply == WorkerReply::Stop {
            warn!(worker = %worker_id, candidate = %candidate, "coordinator declined candidate");
            budget.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let params = candidate.params.clone();
        let result = tokio::task::spawn_blocking(move || branin(&params)).await?;
        handle
            .report_status(candidate.with_result(result), "finished", Some(worker_id.as_str()), false)
            .await?;
        evaluated += 1;
    }

    Ok(evaluated)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let workers: usize = env_or("HYPERSEARCH_WORKERS", 4)?;
    let budget: usize = env_or("HYPERSEARCH_BUDGET", 40)?;
    let config = load_config()?;

    let (coordinator, handle) = Coordinator::from_config(config)?;
    let coordinator = tokio::spawn(coordinator.run());
    info!(workers, budget, "starting local search");

    let budget = Arc::new(AtomicUsize::new(budget));
    let pool: Vec<_> = (0..workers.max(1))
        .map(|id| tokio::spawn(worker(id, handle.clone(), Arc::clone(&budget))))
        .collect();

    let mut evaluated = 0;
    for task in pool {
        evaluated += task.await??;
    }

    handle.shutdown();
    let report = coordinator.await?;
    if let Some(best) = report.best.as_ref().and_then(|c| c.result) {
        info!(evaluated, best, gap = best - BRANIN_MINIMUM, "search complete");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::Candidate;

    #[tokio::test]
    async fn declined_candidate_returns_its_budget() {
        let config = CoordinatorConfig::new("branin", branin_space())
            .with_bootstrap_count(2)
            .with_low_water_mark(2)
            .with_seed(1)
            .with_poll_interval_ms(1);
        let (coordinator, handle) = Coordinator::from_config(config).unwrap();
        // Not tracked by the coordinator, so the working report is declined.
        coordinator.offers().promote(Candidate::new(vec![100.0, 100.0]));
        let loop_task = tokio::spawn(coordinator.run());

        let budget = Arc::new(AtomicUsize::new(1));
        let evaluated = worker(0, handle.clone(), Arc::clone(&budget)).await.unwrap();
        assert_eq!(evaluated, 1);
        assert_eq!(budget.load(Ordering::SeqCst), 0);

        handle.shutdown();
        let report = loop_task.await.unwrap();
        assert_eq!(report.finished.len(), 1);
        assert_eq!(report.protocol_errors, 1);
    }
}
