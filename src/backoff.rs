//! Layer C5 — per-sub-kind retry schedules with jitter (spec §4.5).

use crate::error_classifier::ErrorSubKind;
use rand::Rng;

const CREDITS_EXHAUSTED: &[u64] = &[300, 600, 1800];
const RATE_LIMITED: &[u64] = &[120, 300, 600, 1200];
const SERVICE_UNAVAILABLE: &[u64] = &[5, 10, 30, 60, 120];
const NETWORK_TIMEOUT: &[u64] = &[2, 5, 10, 30, 60];
const DEFAULT: &[u64] = &[5, 15, 60, 300];

fn schedule_for(sub: ErrorSubKind) -> &'static [u64] {
    match sub {
        ErrorSubKind::CreditsExhausted => CREDITS_EXHAUSTED,
        ErrorSubKind::RateLimited => RATE_LIMITED,
        ErrorSubKind::ServiceUnavailable => SERVICE_UNAVAILABLE,
        ErrorSubKind::NetworkTimeout => NETWORK_TIMEOUT,
        _ => DEFAULT,
    }
}

/// `base[min(retry_count, len-1)] + uniform(0, base * 0.1)`, seconds.
pub fn delay_secs(retry_count: u32, sub: ErrorSubKind) -> f64 {
    delay_secs_with_rng(retry_count, sub, &mut rand::thread_rng())
}

/// Testable variant that takes an injectable RNG so jitter bounds can be
/// checked deterministically without flaky ranges.
pub fn delay_secs_with_rng<R: Rng + ?Sized>(retry_count: u32, sub: ErrorSubKind, rng: &mut R) -> f64 {
    let schedule = schedule_for(sub);
    let idx = (retry_count as usize).min(schedule.len() - 1);
    let base = schedule[idx] as f64;
    let jitter = rng.gen_range(0.0..(base * 0.1).max(f64::EPSILON));
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_sub_kind() -> impl Strategy<Value = ErrorSubKind> {
        prop_oneof![
            Just(ErrorSubKind::RateLimited),
            Just(ErrorSubKind::CreditsExhausted),
            Just(ErrorSubKind::ServiceUnavailable),
            Just(ErrorSubKind::NetworkTimeout),
            Just(ErrorSubKind::ApiKeyInvalid),
            Just(ErrorSubKind::BadRequest),
            Just(ErrorSubKind::JsonParse),
            Just(ErrorSubKind::MissingDependency),
            Just(ErrorSubKind::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn delay_always_within_ten_percent_of_base(retry_count in 0u32..100, sub in any_sub_kind()) {
            let mut rng = rand::thread_rng();
            let schedule = schedule_for(sub);
            let base = schedule[(retry_count as usize).min(schedule.len() - 1)] as f64;
            let d = delay_secs_with_rng(retry_count, sub, &mut rng);
            prop_assert!(d >= base && d <= base * 1.1 + f64::EPSILON);
        }
    }

    #[test]
    fn clamps_retry_count_to_last_schedule_entry() {
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let at_bound = delay_secs_with_rng(3, ErrorSubKind::NetworkTimeout, &mut rng);
        let past_bound = delay_secs_with_rng(50, ErrorSubKind::NetworkTimeout, &mut rng);
        assert_eq!(at_bound.floor(), 60.0);
        assert_eq!(past_bound.floor(), 60.0);
    }

    #[test]
    fn jitter_stays_within_ten_percent_of_base() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let d = delay_secs_with_rng(0, ErrorSubKind::CreditsExhausted, &mut rng);
            assert!(d >= 300.0 && d <= 330.0, "delay {d} out of bounds");
        }
    }

    #[test]
    fn credits_and_rate_limit_schedules_match_spec_minimums() {
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        assert!(delay_secs_with_rng(0, ErrorSubKind::CreditsExhausted, &mut rng) >= 300.0);
        assert!(delay_secs_with_rng(1, ErrorSubKind::CreditsExhausted, &mut rng) >= 600.0);
    }
}
