//! Percentage-based sticky traffic routing.
//!
//! Routing is a pure function of `(caller_key, percentage)`: a stable hash
//! of the key picks a bucket in `[0, 100)`, and the caller goes to the new
//! provider iff its bucket is below the configured percentage. Because the
//! bucket never depends on the percentage, raising the percentage only ever
//! moves callers legacy-to-new, and repeated calls for the same key are
//! always routed identically.

use serde::Serialize;

use crate::provider::ProviderKind;

/// Outcome of a routing computation. Ephemeral; recomputed per call.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub provider: ProviderKind,
    pub caller_key: String,
    /// Hash bucket in `[0, 100)` the caller landed in.
    pub bucket: u8,
}

/// Stable hash bucket for a caller key, in `[0, 100)`.
///
/// blake3 keeps the distribution uniform and identical across processes and
/// releases, which the sticky-routing and audit guarantees depend on.
pub fn bucket(caller_key: &str) -> u8 {
    let hash = blake3::hash(caller_key.as_bytes());
    let bytes: [u8; 4] = hash.as_bytes()[..4].try_into().expect("hash is 32 bytes");
    (u32::from_le_bytes(bytes) % 100) as u8
}

/// Route a caller at the given percentage of traffic to the new provider.
///
/// `percentage` is clamped to 100.
pub fn route(caller_key: &str, percentage: u8) -> RoutingDecision {
    let bucket = bucket(caller_key);
    let provider = if bucket < percentage.min(100) {
        ProviderKind::New
    } else {
        ProviderKind::Legacy
    };
    RoutingDecision {
        provider,
        caller_key: caller_key.to_string(),
        bucket,
    }
}

/// Distribution check over a set of caller keys.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub total: usize,
    pub routed_to_new: usize,
    /// The configured percentage.
    pub expected_pct: f64,
    /// Share actually routed to the new provider, in percent.
    pub actual_pct: f64,
    /// `|actual - expected|`.
    pub deviation: f64,
}

/// Compare the live routing distribution against the configured percentage.
///
/// Used to validate that the hash distribution tracks the ramp within
/// sampling tolerance.
pub fn statistics<S: AsRef<str>>(caller_keys: &[S], percentage: u8) -> RoutingStats {
    let total = caller_keys.len();
    let routed_to_new = caller_keys
        .iter()
        .filter(|key| route(key.as_ref(), percentage).provider == ProviderKind::New)
        .count();
    let actual_pct = if total == 0 {
        0.0
    } else {
        routed_to_new as f64 / total as f64 * 100.0
    };
    let expected_pct = f64::from(percentage.min(100));
    RoutingStats {
        total,
        routed_to_new,
        expected_pct,
        actual_pct,
        deviation: (actual_pct - expected_pct).abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_route_is_deterministic() {
        for key in ["caller-a", "caller-b", ""] {
            let first = route(key, 40);
            for _ in 0..20 {
                let again = route(key, 40);
                assert_eq!(again.provider, first.provider);
                assert_eq!(again.bucket, first.bucket);
            }
        }
    }

    #[test]
    fn test_boundary_percentages() {
        for i in 0..200 {
            let key = format!("caller-{i}");
            assert_eq!(route(&key, 0).provider, ProviderKind::Legacy);
            assert_eq!(route(&key, 100).provider, ProviderKind::New);
        }
    }

    #[test]
    fn test_percentage_above_hundred_is_clamped() {
        assert_eq!(route("anyone", 200).provider, ProviderKind::New);
    }

    #[test]
    fn test_distribution_tracks_percentage() {
        let keys: Vec<String> = (0..100).map(|i| format!("caller-{i}")).collect();
        let stats = statistics(&keys, 30);
        assert_eq!(stats.total, 100);
        assert_eq!(stats.expected_pct, 30.0);
        // Hash-distribution variance bound for n=100.
        assert!(stats.deviation < 10.0, "deviation {}", stats.deviation);
    }

    #[test]
    fn test_statistics_empty_keys() {
        let stats = statistics::<&str>(&[], 50);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.actual_pct, 0.0);
        assert_eq!(stats.deviation, 50.0);
    }

    proptest! {
        /// Raising the percentage never moves a caller back to legacy.
        #[test]
        fn prop_monotonic_ramp(key in ".{0,40}", p1 in 0u8..=100, p2 in 0u8..=100) {
            let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
            if route(&key, lo).provider == ProviderKind::New {
                prop_assert_eq!(route(&key, hi).provider, ProviderKind::New);
            }
        }

        #[test]
        fn prop_bucket_in_range(key in ".{0,40}") {
            prop_assert!(bucket(&key) < 100);
        }

        /// The decision is exactly `bucket < percentage`.
        #[test]
        fn prop_decision_matches_bucket(key in ".{0,40}", pct in 0u8..=100) {
            let decision = route(&key, pct);
            prop_assert_eq!(
                decision.provider == ProviderKind::New,
                decision.bucket < pct
            );
        }
    }
}
