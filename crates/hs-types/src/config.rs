//! Coordinator configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ConfigError, HsError, HsResult};
use crate::params::SearchSpace;

/// Unique experiment identifier.
pub type ExperimentId = Uuid;

/// Whether we are minimizing or maximizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Minimize,
    Maximize,
}

impl ObjectiveDirection {
    /// Whether `candidate` is strictly better than `incumbent`.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }

    pub fn is_minimize(&self) -> bool {
        matches!(self, Self::Minimize)
    }
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

/// Covariance function family for the surrogate model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KernelFamily {
    /// Squared exponential.
    #[default]
    Rbf,
    Matern52,
}

/// Surrogate kernel settings. Bounds apply in warped space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub family: KernelFamily,
    pub lengthscale_bounds: (f64, f64),
    pub noise_bounds: (f64, f64),
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            family: KernelFamily::Rbf,
            lengthscale_bounds: (0.1, 1.0),
            noise_bounds: (0.1, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AcquisitionKind {
    #[default]
    ExpectedImprovement,
    ProbabilityOfImprovement,
}

/// Acquisition strategy selection and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub kind: AcquisitionKind,
    /// Minimum improvement margin (xi).
    pub exploration: f64,
    /// Number of random warped points scored per proposal round.
    pub samples: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            kind: AcquisitionKind::ExpectedImprovement,
            exploration: 0.01,
            samples: 1000,
        }
    }
}

/// Top-level configuration for one experiment's coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "Uuid::new_v4")]
    pub experiment_id: ExperimentId,
    #[serde(default)]
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    #[serde(default)]
    pub direction: ObjectiveDirection,

    /// Finished evaluations required before the surrogate model is used.
    #[serde(default = "defaults::bootstrap_count")]
    pub bootstrap_count: usize,

    /// Minimum desired backlog of unclaimed candidates.
    #[serde(default = "defaults::pending_low_water_mark")]
    pub pending_low_water_mark: usize,

    /// Random restarts per model refit.
    #[serde(default = "defaults::refit_restarts")]
    pub refit_restarts: usize,

    /// Extra proposals computed per model-driven generation round.
    #[serde(default)]
    pub num_precomputed: usize,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    /// Seed for all coordinator randomness. `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
}

mod defaults {
    pub fn bootstrap_count() -> usize {
        10
    }

    pub fn pending_low_water_mark() -> usize {
        10
    }

    pub fn refit_restarts() -> usize {
        10
    }

    pub fn poll_interval_ms() -> u64 {
        5
    }
}

impl CoordinatorConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            experiment_id: Uuid::new_v4(),
            name: name.into(),
            search_space,
            direction: ObjectiveDirection::Minimize,
            bootstrap_count: defaults::bootstrap_count(),
            pending_low_water_mark: defaults::pending_low_water_mark(),
            refit_restarts: defaults::refit_restarts(),
            num_precomputed: 0,
            acquisition: AcquisitionConfig::default(),
            kernel: KernelConfig::default(),
            seed: None,
            poll_interval_ms: defaults::poll_interval_ms(),
        }
    }

    /// Parse a JSON configuration. A missing `search_space` is reported as
    /// [`ConfigError::MissingParamDefs`] rather than a generic decode error.
    pub fn from_json(json: &str) -> HsResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("search_space").map_or(true, |v| v.is_null()) {
            return Err(HsError::Config(ConfigError::MissingParamDefs));
        }
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_bootstrap_count(mut self, n: usize) -> Self {
        self.bootstrap_count = n;
        self
    }

    pub fn with_low_water_mark(mut self, n: usize) -> Self {
        self.pending_low_water_mark = n;
        self
    }

    pub fn with_refit_restarts(mut self, n: usize) -> Self {
        self.refit_restarts = n;
        self
    }

    pub fn with_num_precomputed(mut self, n: usize) -> Self {
        self.num_precomputed = n;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionConfig) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelConfig) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search_space.validate()?;

        let (l_low, l_high) = self.kernel.lengthscale_bounds;
        if !(l_low > 0.0 && l_low <= l_high) {
            return Err(ConfigError::InvalidValue {
                field: "kernel.lengthscale_bounds".to_string(),
                message: format!("expected 0 < low <= high, got ({l_low}, {l_high})"),
            });
        }
        let (n_low, n_high) = self.kernel.noise_bounds;
        if !(n_low > 0.0 && n_low <= n_high) {
            return Err(ConfigError::InvalidValue {
                field: "kernel.noise_bounds".to_string(),
                message: format!("expected 0 < low <= high, got ({n_low}, {n_high})"),
            });
        }
        if self.acquisition.samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "acquisition.samples".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
