//! Pure, stateless multi-armed-bandit selectors (C1).
//!
//! Every selector takes an ordered slice of [`VariantStats`] plus whatever scalar
//! parameters it needs, and returns the chosen `variant_name`. None of these
//! functions touch a store, a clock, or the network: callers inject the PRNG so
//! that tests can pin a seed and reproduce a selection exactly.

use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::error::Error;

/// A read-only snapshot of one variant's counters, as returned by the metrics
/// store's `read` projection.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantStats {
    pub variant_name: String,
    pub initial_variant_weight: f64,
    pub invocation_count: u64,
    pub reward_sum: f64,
}

/// The closed set of supported bandit strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Strategy {
    WeightedSampling,
    EpsilonGreedy,
    #[serde(rename = "UCB1")]
    Ucb1,
    ThompsonSampling,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::WeightedSampling => "WeightedSampling",
            Strategy::EpsilonGreedy => "EpsilonGreedy",
            Strategy::Ucb1 => "UCB1",
            Strategy::ThompsonSampling => "ThompsonSampling",
        }
    }

    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "WeightedSampling" => Ok(Strategy::WeightedSampling),
            "EpsilonGreedy" => Ok(Strategy::EpsilonGreedy),
            "UCB1" => Ok(Strategy::Ucb1),
            "ThompsonSampling" => Ok(Strategy::ThompsonSampling),
            other => Err(Error::UnsupportedStrategy {
                strategy: other.to_string(),
            }),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::ThompsonSampling
    }
}

/// Dispatches to the selector named by `strategy`.
pub fn select<R: Rng + ?Sized>(
    strategy: Strategy,
    variants: &[VariantStats],
    epsilon: f64,
    rng: &mut R,
) -> Result<String, Error> {
    match strategy {
        Strategy::WeightedSampling => weighted_sampling(variants, rng),
        Strategy::EpsilonGreedy => epsilon_greedy(variants, epsilon, rng),
        Strategy::Ucb1 => ucb1(variants),
        Strategy::ThompsonSampling => thompson_sampling(variants, rng),
    }
}

/// Draws one variant name with probability proportional to `initial_variant_weight`.
pub fn weighted_sampling<R: Rng + ?Sized>(
    variants: &[VariantStats],
    rng: &mut R,
) -> Result<String, Error> {
    if variants.is_empty() {
        return Err(Error::EmptyVariantSet);
    }
    let total_weight: f64 = variants.iter().map(|v| v.initial_variant_weight).sum();
    if total_weight <= 0. {
        return Err(Error::DegenerateWeights);
    }
    let random_threshold = rng.gen::<f64>() * total_weight;
    let mut cumulative_weight = 0.;
    for variant in variants {
        cumulative_weight += variant.initial_variant_weight;
        if cumulative_weight > random_threshold {
            return Ok(variant.variant_name.clone());
        }
    }
    // Only reachable via floating point rounding at the very top of the range.
    Ok(variants
        .last()
        .expect("checked non-empty above")
        .variant_name
        .clone())
}

/// With probability `epsilon` draws uniformly at random; otherwise exploits the
/// argmax of `reward_sum / invocation_count`. Ties are broken by lowest index,
/// matching Python's `max(..., key=...)` semantics.
pub fn epsilon_greedy<R: Rng + ?Sized>(
    variants: &[VariantStats],
    epsilon: f64,
    rng: &mut R,
) -> Result<String, Error> {
    if variants.is_empty() {
        return Err(Error::EmptyVariantSet);
    }
    if !(0. ..=1.).contains(&epsilon) {
        return Err(Error::InvalidEpsilon { epsilon });
    }
    if rng.gen::<f64>() < epsilon {
        let index = rng.gen_range(0..variants.len());
        return Ok(variants[index].variant_name.clone());
    }
    let index = argmax(variants.iter().map(|v| mean_reward(v)));
    Ok(variants[index].variant_name.clone())
}

/// Picks the argmax of `reward_sum/invocation_count + sqrt(2 * ln(N) / invocation_count)`,
/// where `N` is the total invocation count across all variants. Assumes every
/// variant already has `invocation_count >= 1` — the warmup policy in the
/// assignment service (C6) is responsible for keeping that precondition true
/// before this is ever called.
pub fn ucb1(variants: &[VariantStats]) -> Result<String, Error> {
    if variants.is_empty() {
        return Err(Error::EmptyVariantSet);
    }
    let total_invocations: u64 = variants.iter().map(|v| v.invocation_count).sum();
    let ln_total = (total_invocations as f64).ln();
    let index = argmax(variants.iter().map(|v| {
        let n = v.invocation_count as f64;
        mean_reward(v) + (2. * ln_total / n).sqrt()
    }));
    Ok(variants[index].variant_name.clone())
}

/// For each variant draws `beta ~ Beta(1 + reward_sum, 1 + failure)` and picks
/// the argmax. `reward_sum` isn't bounded by `invocation_count` — a reward
/// greater than 1.0, or several conversions folded against one invocation,
/// can push it past `invocation_count` — so `failure` is clamped to 0 rather
/// than assumed non-negative.
pub fn thompson_sampling<R: Rng + ?Sized>(
    variants: &[VariantStats],
    rng: &mut R,
) -> Result<String, Error> {
    if variants.is_empty() {
        return Err(Error::EmptyVariantSet);
    }
    let draws: Vec<f64> = variants
        .iter()
        .map(|v| {
            let success = v.reward_sum.max(0.);
            let failure = (v.invocation_count as f64 - success).max(0.);
            let beta = Beta::new(1. + success, 1. + failure)
                .expect("alpha and beta are both >= 1. after clamping");
            beta.sample(rng)
        })
        .collect();
    let index = argmax(draws);
    Ok(variants[index].variant_name.clone())
}

fn mean_reward(v: &VariantStats) -> f64 {
    if v.invocation_count == 0 {
        0.
    } else {
        v.reward_sum / v.invocation_count as f64
    }
}

/// Lowest-index argmax: the first element strictly greater than every element
/// before it wins ties, mirroring Python's `max(range(len(a)), key=lambda x: a[x])`.
fn argmax(values: impl IntoIterator<Item = f64>) -> usize {
    let mut best_index = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (index, value) in values.into_iter().enumerate() {
        if value > best_value {
            best_value = value;
            best_index = index;
        }
    }
    best_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn variants(counts: &[(&str, f64, u64, f64)]) -> Vec<VariantStats> {
        counts
            .iter()
            .map(|(name, weight, invocations, reward_sum)| VariantStats {
                variant_name: name.to_string(),
                initial_variant_weight: *weight,
                invocation_count: *invocations,
                reward_sum: *reward_sum,
            })
            .collect()
    }

    #[test]
    fn weighted_sampling_empty_set_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            weighted_sampling(&[], &mut rng).unwrap_err(),
            Error::EmptyVariantSet
        );
    }

    #[test]
    fn weighted_sampling_all_zero_weights_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        let vs = variants(&[("a", 0., 0, 0.), ("b", 0., 0, 0.)]);
        assert_eq!(
            weighted_sampling(&vs, &mut rng).unwrap_err(),
            Error::DegenerateWeights
        );
    }

    #[test]
    fn weighted_sampling_favors_heavier_variant() {
        let mut rng = StdRng::seed_from_u64(42);
        let vs = variants(&[("heavy", 0.9, 0, 0.), ("light", 0.1, 0, 0.)]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..100 {
            let chosen = weighted_sampling(&vs, &mut rng).unwrap();
            *counts.entry(chosen).or_insert(0) += 1;
        }
        assert!(counts["heavy"] > counts["light"]);
    }

    #[test]
    fn epsilon_greedy_rejects_out_of_range_epsilon() {
        let mut rng = StdRng::seed_from_u64(0);
        let vs = variants(&[("a", 1., 10, 1.)]);
        assert_eq!(
            epsilon_greedy(&vs, 1.5, &mut rng).unwrap_err(),
            Error::InvalidEpsilon { epsilon: 1.5 }
        );
    }

    #[test]
    fn epsilon_greedy_mostly_exploits_best_variant() {
        let mut rng = StdRng::seed_from_u64(7);
        // rates: 10/100 = 0.1, 20/100 = 0.2
        let vs = variants(&[("a", 1., 100, 10.), ("b", 1., 100, 20.)]);
        let mut best_count = 0;
        for _ in 0..100 {
            if epsilon_greedy(&vs, 0.1, &mut rng).unwrap() == "b" {
                best_count += 1;
            }
        }
        assert!(best_count >= 80, "expected >=80 picks of b, got {best_count}");
    }

    #[test]
    fn ucb1_favors_high_count_high_rate_variant() {
        // N = 300, rates 10/100, 20/100, 50/100
        let vs = variants(&[("a", 1., 100, 10.), ("b", 1., 100, 20.), ("c", 1., 100, 50.)]);
        assert_eq!(ucb1(&vs).unwrap(), "c");
    }

    #[test]
    fn ucb1_exploration_bonus_can_favor_undersampled_variant() {
        // rates 1/10, 2/10, 50/100 — the undersampled variants get a much larger bonus
        let vs = variants(&[("a", 1., 10, 1.), ("b", 1., 10, 2.), ("c", 1., 100, 50.)]);
        assert_eq!(ucb1(&vs).unwrap(), "b");
    }

    #[test]
    fn ucb1_empty_set_fails() {
        assert_eq!(ucb1(&[]).unwrap_err(), Error::EmptyVariantSet);
    }

    #[test]
    fn thompson_sampling_mode_favors_higher_rate() {
        let mut rng = StdRng::seed_from_u64(123);
        let vs = variants(&[("a", 1., 10, 1.), ("b", 1., 10, 2.), ("c", 1., 10, 5.)]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..100 {
            let chosen = thompson_sampling(&vs, &mut rng).unwrap();
            *counts.entry(chosen).or_insert(0) += 1;
        }
        let mode = counts.iter().max_by_key(|(_, count)| **count).unwrap().0;
        assert_eq!(mode, "c");
    }

    #[test]
    fn thompson_sampling_does_not_panic_when_reward_exceeds_invocations() {
        // reward_sum (5.) > invocation_count (1) for "a" — reachable once a
        // sticky variant accumulates conversions across several calls, or a
        // single conversion carries reward > 1.0.
        let mut rng = StdRng::seed_from_u64(7);
        let vs = variants(&[("a", 1., 1, 5.), ("b", 1., 10, 2.)]);
        thompson_sampling(&vs, &mut rng).unwrap();
    }

    #[test]
    fn strategy_round_trips_through_parse() {
        for s in [
            Strategy::WeightedSampling,
            Strategy::EpsilonGreedy,
            Strategy::Ucb1,
            Strategy::ThompsonSampling,
        ] {
            assert_eq!(Strategy::parse(s.as_str()).unwrap(), s);
        }
        assert!(Strategy::parse("Nonsense").is_err());
    }
}
