//! Target key selection.
//!
//! The Zipf pool is an approximation: key `i` gets weight `1/i` and is
//! replicated `max(1, floor(weight * 100))` times, then draws are uniform
//! over the pool. The split pool is a plain Bernoulli draw between a hot and
//! a cold key.

use rand::Rng;

use crate::models::scenario::{Scenario, WorkloadKind};

const POOL_SCALE: f64 = 100.0;

/// Deterministic stand-in identifier for the `i`-th cold key.
pub fn pseudo_key(i: usize) -> String {
    let h = format!("{:04x}", i);
    format!("00000000-0000-0000-0000-{h}{h}{h}{h}")
}

/// Where each iteration's menu id comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPool {
    /// Ordered multiset; draws are uniform over the entries.
    Weighted(Vec<String>),
    /// Hot key with probability `hot_ratio`, otherwise the cold key.
    Split {
        hot: String,
        cold: String,
        hot_ratio: f64,
    },
}

impl KeyPool {
    pub fn single(key: &str) -> Self {
        Self::Weighted(vec![key.to_string()])
    }

    /// Zipf-weighted pool over `n` keys; key 1 is `hot_key`.
    pub fn zipf(hot_key: &str, n: usize) -> Self {
        let n = n.max(1);
        let mut entries = Vec::new();
        for i in 1..=n {
            let key = if i == 1 {
                hot_key.to_string()
            } else {
                pseudo_key(i)
            };
            let reps = replicas(i);
            entries.extend(std::iter::repeat(key).take(reps));
        }
        Self::Weighted(entries)
    }

    /// Ratios outside `[0, 1]` are clamped.
    pub fn split(hot_key: &str, cold_key: &str, hot_ratio: f64) -> Self {
        let hot_ratio = if hot_ratio.is_nan() {
            0.0
        } else {
            hot_ratio.clamp(0.0, 1.0)
        };
        Self::Split {
            hot: hot_key.to_string(),
            cold: cold_key.to_string(),
            hot_ratio,
        }
    }

    pub fn for_workload(kind: WorkloadKind, hot_key: &str, zipf_keys: usize) -> Self {
        match kind {
            WorkloadKind::ZipfMixed => Self::zipf(hot_key, zipf_keys),
            WorkloadKind::ReserveConfirm
            | WorkloadKind::ReserveStorm
            | WorkloadKind::IdempotencyDoubleHit
            | WorkloadKind::ReserveCheck => Self::single(hot_key),
        }
    }

    /// A scenario's key mix wins over its workload's default pool.
    pub fn for_scenario(scenario: &Scenario, hot_key: &str, default_zipf_keys: usize) -> Self {
        match &scenario.key_mix {
            Some(mix) => Self::split(hot_key, &mix.cold_key, mix.hot_ratio),
            None => Self::for_workload(
                scenario.workload,
                hot_key,
                scenario.zipf_keys.unwrap_or(default_zipf_keys),
            ),
        }
    }

    /// Rank-1 key; every pool starts with it.
    pub fn hot_key(&self) -> &str {
        match self {
            Self::Weighted(entries) => entries.first().map(String::as_str).unwrap_or(""),
            Self::Split { hot, .. } => hot,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Weighted(entries) => entries.len(),
            Self::Split { .. } => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        match self {
            Self::Weighted(entries) => {
                if entries.is_empty() {
                    return "";
                }
                &entries[rng.gen_range(0..entries.len())]
            }
            Self::Split {
                hot,
                cold,
                hot_ratio,
            } => {
                if rng.gen::<f64>() < *hot_ratio {
                    hot
                } else {
                    cold
                }
            }
        }
    }

    pub fn sample_key(&self) -> &str {
        self.sample(&mut rand::thread_rng())
    }
}

fn replicas(rank: usize) -> usize {
    let weight = 1.0 / rank as f64;
    ((weight * POOL_SCALE).floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const HOT: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn single_pool_always_returns_hot_key() {
        let pool = KeyPool::for_workload(WorkloadKind::ReserveConfirm, HOT, 20);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(pool.sample(&mut rng), HOT);
        }
        let pool = KeyPool::for_workload(WorkloadKind::IdempotencyDoubleHit, HOT, 20);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn zipf_pool_replication_counts() {
        let pool = KeyPool::zipf(HOT, 5);
        // 100 + 50 + 33 + 25 + 20
        assert_eq!(pool.len(), 228);
        assert_eq!(pool.hot_key(), HOT);

        let pool = KeyPool::zipf(HOT, 200);
        // keys past rank 100 still get one entry each
        let KeyPool::Weighted(entries) = pool else {
            panic!("zipf pool is weighted");
        };
        assert_eq!(entries.iter().filter(|k| **k == pseudo_key(150)).count(), 1);
    }

    #[test]
    fn pseudo_keys_are_distinct_from_hot_key() {
        assert_eq!(pseudo_key(2), "00000000-0000-0000-0000-0002000200020002");
        assert_ne!(pseudo_key(2), pseudo_key(3));
    }

    #[test]
    fn zipf_draws_follow_normalized_weights() {
        let n = 5;
        let pool = KeyPool::zipf(HOT, n);
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 100_000;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(pool.sample(&mut rng).to_string()).or_insert(0) += 1;
        }

        let harmonic: f64 = (1..=n).map(|j| 1.0 / j as f64).sum();
        for i in 1..=n {
            let key = if i == 1 { HOT.to_string() } else { pseudo_key(i) };
            let expected = (1.0 / i as f64) / harmonic;
            let observed = counts[&key] as f64 / draws as f64;
            assert!(
                observed > expected / 2.0 && observed < expected * 2.0,
                "key {i}: observed {observed}, expected {expected}"
            );
        }
    }

    const COLD: &str = "22222222-2222-2222-2222-222222222222";

    #[test]
    fn split_draws_follow_hot_ratio() {
        let pool = KeyPool::split(HOT, COLD, 0.7);
        let mut rng = StdRng::seed_from_u64(11);
        let draws = 100_000;
        let hot = (0..draws).filter(|_| pool.sample(&mut rng) == HOT).count();
        let observed = hot as f64 / draws as f64;
        assert!(
            (observed - 0.7).abs() < 0.01,
            "hot share {observed}, expected 0.7"
        );
        assert_eq!(pool.hot_key(), HOT);
    }

    #[test]
    fn split_extremes_pin_one_key() {
        let mut rng = StdRng::seed_from_u64(3);
        let hot_only = KeyPool::split(HOT, COLD, 1.0);
        let cold_only = KeyPool::split(HOT, COLD, 0.0);
        for _ in 0..1000 {
            assert_eq!(hot_only.sample(&mut rng), HOT);
            assert_eq!(cold_only.sample(&mut rng), COLD);
        }
        assert_eq!(KeyPool::split(HOT, COLD, 3.0), hot_only);
    }

    #[test]
    fn key_mix_overrides_workload_pool() {
        use crate::models::scenario::RampProfile;
        let scenario = Scenario::new("mixed", WorkloadKind::ZipfMixed, RampProfile::default())
            .with_key_mix(COLD, 0.5);
        assert_eq!(KeyPool::for_scenario(&scenario, HOT, 20), KeyPool::split(HOT, COLD, 0.5));

        let plain = Scenario::new("zipf", WorkloadKind::ZipfMixed, RampProfile::default());
        assert_eq!(KeyPool::for_scenario(&plain, HOT, 5).len(), 228);
    }
}
