//! Search space definitions and per-dimension warp transforms.
//!
//! Every modelable dimension maps its raw value onto `[0, 1]` ("warp in") and
//! back ("warp out"). Surrogate models and acquisition functions only ever see
//! warped vectors; workers only ever see raw ones.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled and warped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (warped in log-space).
    LogUniform { low: f64, high: f64 },
    /// Ordered set of admissible values. Warped linearly between the first and
    /// last position, warped out by snapping to the nearest position.
    Position { positions: Vec<f64> },
    /// Categorical choices. Representable, but not supported by the
    /// surrogate-driven coordinator.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::FloatRange { .. } => "float_range",
            Self::IntRange { .. } => "int_range",
            Self::LogUniform { .. } => "log_uniform",
            Self::Position { .. } => "position",
            Self::Choice { .. } => "choice",
        }
    }

    /// Whether the dimension has a continuous warped representation.
    pub fn is_modelable(&self) -> bool {
        !matches!(self, Self::Choice { .. })
    }

    /// Map a raw value into the model's `[0, 1]` representation.
    pub fn warp_in(&self, raw: f64) -> f64 {
        match self {
            Self::FloatRange { low, high } => linear_in(raw, *low, *high),
            Self::IntRange { low, high } => linear_in(raw, *low as f64, *high as f64),
            Self::LogUniform { low, high } => linear_in(raw.ln(), low.ln(), high.ln()),
            Self::Position { positions } => match (positions.first(), positions.last()) {
                (Some(first), Some(last)) => linear_in(raw, *first, *last),
                _ => 0.5,
            },
            // Index encoding; only used by the bootstrap sampler.
            Self::Choice { values } => linear_in(raw, 0.0, values.len().saturating_sub(1) as f64),
        }
    }

    /// Map a warped value back into raw units. Values outside `[0, 1]` are
    /// clamped first.
    pub fn warp_out(&self, warped: f64) -> f64 {
        let u = if warped.is_finite() {
            warped.clamp(0.0, 1.0)
        } else {
            0.5
        };
        match self {
            Self::FloatRange { low, high } => low + u * (high - low),
            Self::IntRange { low, high } => {
                (*low as f64 + u * (*high - *low) as f64).round()
            }
            Self::LogUniform { low, high } => {
                (low.ln() + u * (high.ln() - low.ln())).exp().clamp(*low, *high)
            }
            Self::Position { positions } => {
                let (Some(first), Some(last)) = (positions.first(), positions.last()) else {
                    return 0.0;
                };
                let target = first + u * (last - first);
                positions
                    .iter()
                    .copied()
                    .min_by(|a, b| {
                        (a - target)
                            .abs()
                            .partial_cmp(&(b - target).abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(*first)
            }
            Self::Choice { values } => (u * values.len().saturating_sub(1) as f64).round(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidBounds {
            name: name.to_string(),
            message,
        };
        match self {
            Self::FloatRange { low, high } => {
                if !(low.is_finite() && high.is_finite()) || low >= high {
                    return Err(invalid(format!("expected finite low < high, got [{low}, {high}]")));
                }
            }
            Self::IntRange { low, high } => {
                if low > high {
                    return Err(invalid(format!("expected low <= high, got [{low}, {high}]")));
                }
            }
            Self::LogUniform { low, high } => {
                if !(low.is_finite() && high.is_finite()) || *low <= 0.0 || low >= high {
                    return Err(invalid(format!(
                        "expected 0 < low < high, got [{low}, {high}]"
                    )));
                }
            }
            Self::Position { positions } => {
                if positions.len() < 2 {
                    return Err(invalid("at least two positions are required".to_string()));
                }
                if positions.iter().any(|p| !p.is_finite())
                    || positions.windows(2).any(|w| w[0] >= w[1])
                {
                    return Err(invalid("positions must be finite and strictly increasing".to_string()));
                }
            }
            Self::Choice { .. } => {
                return Err(ConfigError::UnsupportedDimension {
                    name: name.to_string(),
                    kind: self.type_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn linear_in(raw: f64, low: f64, high: f64) -> f64 {
    let span = high - low;
    if span == 0.0 {
        return 0.5;
    }
    (raw - low) / span
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_position(mut self, name: impl Into<String>, positions: Vec<f64>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Position { positions },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn dimensions(&self) -> usize {
        self.parameters.len()
    }

    /// Check that the space is non-empty and every dimension can be modeled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::MissingParamDefs);
        }
        for param in &self.parameters {
            param.kind.validate(&param.name)?;
        }
        Ok(())
    }

    /// Warp a raw parameter vector into model space, dimension by dimension.
    pub fn warp_in(&self, raw: &[f64]) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(raw)
            .map(|(param, value)| param.kind.warp_in(*value))
            .collect()
    }

    /// Warp a model-space vector back into raw units.
    pub fn warp_out(&self, warped: &[f64]) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(warped)
            .map(|(param, value)| param.kind.warp_out(*value))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_float("dropout", 0.0, 0.5)
            .add_int("layers", 1, 8)
            .add_log_uniform("lr", 1e-5, 1e-1)
            .add_position("batch", vec![16.0, 32.0, 64.0, 128.0])
    }

    #[test]
    fn search_space_builder_chain() {
        let space = sample_space();
        assert_eq!(space.dimensions(), 4);
        assert!(space.validate().is_ok());
    }

    #[test]
    fn empty_space_is_missing_param_defs() {
        assert_eq!(SearchSpace::new().validate(), Err(ConfigError::MissingParamDefs));
    }

    #[test]
    fn choice_dimension_is_rejected() {
        let space = sample_space().add_choice("act", vec![serde_json::json!("relu")]);
        match space.validate() {
            Err(ConfigError::UnsupportedDimension { name, kind }) => {
                assert_eq!(name, "act");
                assert_eq!(kind, "choice");
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let space = SearchSpace::new().add_log_uniform("lr", 0.0, 1.0);
        assert!(matches!(space.validate(), Err(ConfigError::InvalidBounds { .. })));

        let space = SearchSpace::new().add_float("x", 1.0, 1.0);
        assert!(matches!(space.validate(), Err(ConfigError::InvalidBounds { .. })));

        let space = SearchSpace::new().add_position("p", vec![2.0, 1.0]);
        assert!(matches!(space.validate(), Err(ConfigError::InvalidBounds { .. })));
    }

    #[test]
    fn warp_in_maps_bounds_to_unit_interval() {
        let kind = ParameterKind::FloatRange { low: 0.0, high: 10.0 };
        assert_eq!(kind.warp_in(0.0), 0.0);
        assert_eq!(kind.warp_in(10.0), 1.0);
        assert_eq!(kind.warp_in(2.5), 0.25);

        let log = ParameterKind::LogUniform { low: 1e-4, high: 1.0 };
        assert!((log.warp_in(1e-2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn warp_out_clamps_out_of_range_values() {
        let kind = ParameterKind::FloatRange { low: 0.0, high: 10.0 };
        assert_eq!(kind.warp_out(1.7), 10.0);
        assert_eq!(kind.warp_out(-0.3), 0.0);
        assert_eq!(kind.warp_out(f64::NAN), 5.0);
    }

    #[test]
    fn position_warp_out_snaps_to_nearest() {
        let kind = ParameterKind::Position {
            positions: vec![16.0, 32.0, 64.0, 128.0],
        };
        // 0.2 * 112 + 16 = 38.4, nearest listed position is 32
        assert_eq!(kind.warp_out(0.2), 32.0);
    }

    proptest! {
        #[test]
        fn float_round_trip(v in -50.0f64..50.0) {
            let kind = ParameterKind::FloatRange { low: -50.0, high: 50.0 };
            prop_assert!((kind.warp_out(kind.warp_in(v)) - v).abs() < 1e-9);
        }

        #[test]
        fn int_round_trip(v in -20i64..=20) {
            let kind = ParameterKind::IntRange { low: -20, high: 20 };
            prop_assert_eq!(kind.warp_out(kind.warp_in(v as f64)), v as f64);
        }

        #[test]
        fn log_uniform_round_trip(exponent in -5.0f64..2.0) {
            let kind = ParameterKind::LogUniform { low: 1e-5, high: 100.0 };
            let v = 10f64.powf(exponent);
            prop_assert!((kind.warp_out(kind.warp_in(v)) - v).abs() <= 1e-9 * v.max(1.0));
        }

        #[test]
        fn position_round_trip(idx in 0usize..4) {
            let positions = vec![16.0, 32.0, 64.0, 128.0];
            let kind = ParameterKind::Position { positions: positions.clone() };
            prop_assert_eq!(kind.warp_out(kind.warp_in(positions[idx])), positions[idx]);
        }

        #[test]
        fn space_round_trip(a in 0.0f64..0.5, b in 1i64..=8, c in -5.0f64..-1.0) {
            let space = sample_space();
            let raw = vec![a, b as f64, 10f64.powf(c), 64.0];
            let back = space.warp_out(&space.warp_in(&raw));
            for (x, y) in raw.iter().zip(&back) {
                prop_assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0));
            }
        }
    }
}
