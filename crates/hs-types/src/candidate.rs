//! Candidate points and the worker-facing status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ObjectiveDirection;
use crate::errors::ProtocolError;

/// A point in parameter space (raw units) plus its evaluation outcome.
///
/// Identity is by value of `params`: two candidates with equal vectors are the
/// same point regardless of result, cost or worker information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub params: Vec<f64>,
    pub result: Option<f64>,
    pub cost: Option<f64>,
    /// Opaque payload a worker may attach and read back.
    #[serde(default)]
    pub worker_information: Option<serde_json::Value>,
}

impl Candidate {
    pub fn new(params: Vec<f64>) -> Self {
        Self {
            params,
            result: None,
            cost: None,
            worker_information: None,
        }
    }

    pub fn with_result(mut self, result: f64) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey::from_params(&self.params)
    }

    pub fn same_point(&self, other: &Candidate) -> bool {
        self.key() == other.key()
    }

    /// Whether `self` has a strictly better result than `other`. Candidates
    /// without a result are never better.
    pub fn is_better_than(&self, other: &Candidate, direction: ObjectiveDirection) -> bool {
        match (self.result, other.result) {
            (Some(mine), Some(theirs)) => direction.improves(mine, theirs),
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.same_point(other)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.params)?;
        if let Some(result) = self.result {
            write!(f, " -> {result}")?;
        }
        Ok(())
    }
}

/// Hashable identity of a parameter vector. `-0.0` and `0.0` collapse to the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateKey(Vec<u64>);

impl CandidateKey {
    pub fn from_params(params: &[f64]) -> Self {
        Self(
            params
                .iter()
                .map(|v| if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
                .collect(),
        )
    }
}

/// Where a candidate currently lives inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Pending,
    Working,
    Finished,
}

/// Status a worker reports about the candidate it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Working,
    Pausing,
    Finished,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Pausing => "pausing",
            Self::Finished => "finished",
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "pausing" => Ok(Self::Pausing),
            "finished" => Ok(Self::Finished),
            other => Err(ProtocolError::UnrecognizedStatus {
                status: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coordinator's answer to a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerReply {
    /// Keep evaluating this candidate.
    Continue,
    /// Stop evaluating this candidate.
    Stop,
}

impl WorkerReply {
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_result() {
        let a = Candidate::new(vec![1.0, 2.0]).with_result(3.0);
        let b = Candidate::new(vec![1.0, 2.0]);
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, Candidate::new(vec![1.0, 2.5]));
    }

    #[test]
    fn signed_zero_is_same_point() {
        assert_eq!(
            CandidateKey::from_params(&[-0.0, 1.0]),
            CandidateKey::from_params(&[0.0, 1.0])
        );
    }

    #[test]
    fn better_than_respects_direction() {
        let low = Candidate::new(vec![0.0]).with_result(1.0);
        let high = Candidate::new(vec![1.0]).with_result(2.0);
        assert!(low.is_better_than(&high, ObjectiveDirection::Minimize));
        assert!(high.is_better_than(&low, ObjectiveDirection::Maximize));
        assert!(!low.is_better_than(&low, ObjectiveDirection::Minimize));
        assert!(!Candidate::new(vec![2.0]).is_better_than(&low, ObjectiveDirection::Minimize));
    }

    #[test]
    fn status_parsing() {
        assert_eq!("finished".parse::<WorkerStatus>(), Ok(WorkerStatus::Finished));
        assert_eq!("pausing".parse::<WorkerStatus>(), Ok(WorkerStatus::Pausing));
        assert!(matches!(
            "done".parse::<WorkerStatus>(),
            Err(ProtocolError::UnrecognizedStatus { .. })
        ));
    }

    #[test]
    fn candidate_json_round_trip() {
        let candidate = Candidate::new(vec![0.5, 3.0]).with_result(0.25).with_cost(12.0);
        let json = serde_json::to_string(&candidate).unwrap();
        let back: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.params, candidate.params);
        assert_eq!(back.result, Some(0.25));
        assert_eq!(back.cost, Some(12.0));
    }
}
