//! Random candidate generation for the bootstrap phase.

use hs_types::{Candidate, HsResult, ParameterKind, SearchSpace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Independent random sampling across the search space, used before enough
/// evaluations exist to fit a surrogate model.
#[derive(Debug, Clone)]
pub struct BootstrapSampler {
    space: SearchSpace,
    rng: StdRng,
}

impl BootstrapSampler {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> HsResult<Self> {
        space.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self { space, rng })
    }

    /// Split off an independent sampler, e.g. to hand to a background task.
    /// Deterministic for a seeded parent.
    pub fn fork(&mut self) -> Self {
        Self {
            space: self.space.clone(),
            rng: StdRng::seed_from_u64(self.rng.random()),
        }
    }

    pub fn sample_one(&mut self) -> Candidate {
        let rng = &mut self.rng;
        let params = self
            .space
            .parameters
            .iter()
            .map(|param| match &param.kind {
                ParameterKind::FloatRange { low, high } => rng.random_range(*low..=*high),
                ParameterKind::IntRange { low, high } => rng.random_range(*low..=*high) as f64,
                ParameterKind::LogUniform { low, high } => {
                    let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                    log_val.exp().clamp(*low, *high)
                }
                ParameterKind::Position { positions } => {
                    positions[rng.random_range(0..positions.len())]
                }
                ParameterKind::Choice { values } => rng.random_range(0..values.len().max(1)) as f64,
            })
            .collect();

        Candidate::new(params)
    }

    pub fn suggest(&mut self, count: usize) -> Vec<Candidate> {
        (0..count).map(|_| self.sample_one()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("layers", 1, 4)
            .add_float("dropout", 0.0, 0.5)
            .add_log_uniform("lr", 1e-5, 1e-1)
            .add_position("batch", vec![16.0, 32.0, 64.0])
    }

    #[test]
    fn bootstrap_respects_bounds() {
        let mut sampler = BootstrapSampler::new(sample_space(), Some(7)).unwrap();
        let suggestions = sampler.suggest(200);
        assert_eq!(suggestions.len(), 200);

        for candidate in &suggestions {
            let p = &candidate.params;
            assert!((1.0..=4.0).contains(&p[0]) && p[0].fract() == 0.0);
            assert!((0.0..=0.5).contains(&p[1]));
            assert!((1e-5..=1e-1).contains(&p[2]), "lr out of bounds: {}", p[2]);
            assert!([16.0, 32.0, 64.0].contains(&p[3]));
            assert!(candidate.result.is_none());
        }
    }

    #[test]
    fn seeded_samplers_are_reproducible() {
        let mut a = BootstrapSampler::new(sample_space(), Some(42)).unwrap();
        let mut b = BootstrapSampler::new(sample_space(), Some(42)).unwrap();
        let xs: Vec<Vec<f64>> = a.suggest(5).into_iter().map(|c| c.params).collect();
        let ys: Vec<Vec<f64>> = b.suggest(5).into_iter().map(|c| c.params).collect();
        assert_eq!(xs, ys);

        let fa: Vec<Vec<f64>> = a.fork().suggest(3).into_iter().map(|c| c.params).collect();
        let fb: Vec<Vec<f64>> = b.fork().suggest(3).into_iter().map(|c| c.params).collect();
        assert_eq!(fa, fb);
    }

    #[test]
    fn rejects_unsupported_space() {
        let space = SearchSpace::new().add_choice("opt", vec![serde_json::json!("adam")]);
        assert!(BootstrapSampler::new(space, None).is_err());
    }
}
