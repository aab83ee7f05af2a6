//! Benchmark objectives for local runs.

use hs_types::SearchSpace;
use std::f64::consts::PI;

/// Global minimum of [`branin`], reached at three points.
pub const BRANIN_MINIMUM: f64 = 0.397_887_357_729_738;

/// Branin-Hoo on `x1 in [-5, 10]`, `x2 in [0, 15]`.
pub fn branin(params: &[f64]) -> f64 {
    let (x1, x2) = (params[0], params[1]);
    let b = 5.1 / (4.0 * PI * PI);
    let c = 5.0 / PI;
    let t = 1.0 / (8.0 * PI);
    (x2 - b * x1 * x1 + c * x1 - 6.0).powi(2) + 10.0 * (1.0 - t) * x1.cos() + 10.0
}

pub fn branin_space() -> SearchSpace {
    SearchSpace::new()
        .add_float("x1", -5.0, 10.0)
        .add_float("x2", 0.0, 15.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branin_minima() {
        for point in [[-PI, 12.275], [PI, 2.275], [9.42478, 2.475]] {
            assert!((branin(&point) - BRANIN_MINIMUM).abs() < 1e-4, "{point:?}");
        }
        assert!(branin(&[0.0, 0.0]) > 50.0);
    }

    #[test]
    fn space_is_two_dimensional() {
        let space = branin_space();
        assert_eq!(space.dimensions(), 2);
        assert!(space.validate().is_ok());
    }
}
