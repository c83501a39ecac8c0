use rand::{Rng, RngCore};

use crate::errors::GenerationError;

/// Below this magnitude the branching factor is treated as zero and the
/// distribution is uniform.
const UNIFORM_EPSILON: f64 = 1e-9;

/// Picks the artifact the next operation branches from.
///
/// Live artifacts are ranked by creation order and weighted
/// `p_i ∝ e^(b·i)`. A large positive branching factor concentrates draws on
/// the most recent artifacts (star-like fan-out from the newest nodes). A
/// factor near zero picks uniformly, and a negative one favours the oldest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArtifactSelector {
    branching_factor: f64,
}

impl ArtifactSelector {
    pub fn new(branching_factor: f64) -> Result<Self, GenerationError> {
        if !branching_factor.is_finite() {
            return Err(GenerationError::InvalidRequest(format!(
                "branching factor must be finite, got {branching_factor}"
            )));
        }
        Ok(Self { branching_factor })
    }

    pub fn branching_factor(&self) -> f64 {
        self.branching_factor
    }

    /// Selection probabilities for `k` artifacts in creation order.
    pub fn probabilities(&self, k: usize) -> Vec<f64> {
        match k {
            0 => Vec::new(),
            1 => vec![1.0],
            _ if self.branching_factor.abs() < UNIFORM_EPSILON => vec![1.0 / k as f64; k],
            _ => {
                let b = self.branching_factor;
                let shift = if b > 0.0 { b * (k - 1) as f64 } else { 0.0 };
                let weights: Vec<f64> = (0..k).map(|i| (b * i as f64 - shift).exp()).collect();
                let total: f64 = weights.iter().sum();
                weights.into_iter().map(|weight| weight / total).collect()
            }
        }
    }

    /// Select one of `live` (in creation order) that is not in `excluded`.
    /// Returns `None` when every artifact is excluded.
    pub fn select<'l, S: AsRef<str>>(
        &self,
        live: &'l [S],
        excluded: &[String],
        rng: &mut dyn RngCore,
    ) -> Option<&'l str> {
        let candidates: Vec<&str> = live
            .iter()
            .map(|label| label.as_ref())
            .filter(|label| !excluded.iter().any(|skip| skip.as_str() == *label))
            .collect();
        match candidates.len() {
            0 => None,
            1 => candidates.first().copied(),
            k => {
                let draw = rng.random::<f64>();
                let mut cumulative = 0.0;
                for (label, probability) in candidates.iter().copied().zip(self.probabilities(k)) {
                    cumulative += probability;
                    if draw < cumulative {
                        return Some(label);
                    }
                }
                candidates.last().copied()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn labels(k: usize) -> Vec<String> {
        (0..k).map(forkbench_core::artifact_label).collect()
    }

    #[test]
    fn probabilities_sum_to_one_and_never_decrease() {
        for b in [0.01, 0.5, 1.0, 5.0, 50.0, 800.0] {
            let selector = ArtifactSelector::new(b).expect("selector");
            for k in 1..40 {
                let probabilities = selector.probabilities(k);
                let total: f64 = probabilities.iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "b={b} k={k} total={total}");
                assert!(probabilities.iter().all(|p| p.is_finite()));
                for pair in probabilities.windows(2) {
                    assert!(pair[1] >= pair[0], "b={b} k={k}");
                }
            }
        }
    }

    #[test]
    fn zero_branching_factor_is_uniform() {
        let selector = ArtifactSelector::new(0.0).expect("selector");
        assert_eq!(selector.probabilities(4), vec![0.25; 4]);
    }

    #[test]
    fn negative_branching_factor_favours_old_artifacts() {
        let selector = ArtifactSelector::new(-2.0).expect("selector");
        let probabilities = selector.probabilities(3);
        assert!(probabilities[0] > probabilities[2]);
    }

    #[test]
    fn non_finite_branching_factor_is_rejected() {
        assert!(ArtifactSelector::new(f64::NAN).is_err());
        assert!(ArtifactSelector::new(f64::INFINITY).is_err());
    }

    #[test]
    fn single_artifact_is_always_selected() {
        let selector = ArtifactSelector::new(3.0).expect("selector");
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let live = labels(1);
        assert_eq!(selector.select(&live, &[], &mut rng), Some("artifact_0"));
    }

    #[test]
    fn excluded_artifacts_are_skipped() {
        let selector = ArtifactSelector::new(1.0).expect("selector");
        let live = labels(3);
        let excluded = vec!["artifact_0".to_string(), "artifact_2".to_string()];
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            assert_eq!(
                selector.select(&live, &excluded, &mut rng),
                Some("artifact_1")
            );
        }
        assert_eq!(
            selector.select(&live, &live, &mut ChaCha8Rng::seed_from_u64(1)),
            None
        );
    }

    #[test]
    fn large_branching_factor_picks_the_newest() {
        let selector = ArtifactSelector::new(50.0).expect("selector");
        let live = labels(6);
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for _ in 0..50 {
            assert_eq!(selector.select(&live, &[], &mut rng), Some("artifact_5"));
        }
    }
}
