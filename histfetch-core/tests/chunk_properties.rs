//! Property tests for the chunk planner.
//!
//! Uses proptest to verify:
//! 1. Coverage: chunks are ordered, contiguous, and reconstruct the range
//! 2. Fit: a range under the cap comes back as a single unchanged chunk
//! 3. Size: every chunk except possibly the last is exactly one window

use chrono::{DateTime, Duration, TimeZone, Utc};
use histfetch_core::{ChunkPolicy, DateRange, Timeframe};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_range() -> impl Strategy<Value = DateRange> {
    // 2000-01-01 .. 2030-01-01, lengths up to ~3 years in minutes
    (946_684_800i64..1_893_456_000i64, 0i64..1_600_000i64).prop_map(|(start, minutes)| {
        let start: DateTime<Utc> = Utc.timestamp_opt(start, 0).unwrap();
        DateRange::new(start, start + Duration::minutes(minutes)).unwrap()
    })
}

fn arb_timeframe() -> impl Strategy<Value = Timeframe> {
    prop::sample::select(Timeframe::ALL.to_vec())
}

fn arb_policy() -> impl Strategy<Value = ChunkPolicy> {
    (arb_timeframe(), 1u64..200_000u64, 0.05..=1.0_f64).prop_map(|(tf, max, margin)| {
        ChunkPolicy::bars(tf, max)
            .unwrap()
            .with_safety_margin(margin)
            .unwrap()
    })
}

// ── 1. Coverage ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Chunks are contiguous, ordered, and their union is the requested range.
    #[test]
    fn chunks_reconstruct_range(range in arb_range(), policy in arb_policy()) {
        let chunks = policy.plan(&range);

        prop_assert!(!chunks.is_empty());
        prop_assert_eq!(chunks.first().unwrap().start(), range.start());
        prop_assert_eq!(chunks.last().unwrap().end(), range.end());
        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[0].end(), pair[1].start());
            prop_assert!(pair[0].start() < pair[0].end());
        }

        let total: Duration = chunks.iter().map(|c| c.duration()).fold(Duration::zero(), |a, b| a + b);
        prop_assert_eq!(total, range.duration());
    }

    /// Every timestamp in the range falls in exactly one chunk.
    #[test]
    fn each_instant_has_one_owner(
        range in arb_range(),
        policy in arb_policy(),
        frac in 0.0..1.0_f64,
    ) {
        prop_assume!(!range.is_empty());
        let offset = (range.duration().num_seconds() as f64 * frac) as i64;
        let t = range.start() + Duration::seconds(offset);
        prop_assume!(range.contains(t));

        let owners = policy.plan(&range).iter().filter(|c| c.contains(t)).count();
        prop_assert_eq!(owners, 1);
    }
}

// ── 2. Fit ───────────────────────────────────────────────────────────

proptest! {
    /// If the cap covers the whole range, exactly one chunk equal to it is produced.
    #[test]
    fn fitting_range_is_untouched(range in arb_range(), tf in arb_timeframe()) {
        let policy = ChunkPolicy::bars(tf, u64::MAX / 2).unwrap();
        prop_assert_eq!(policy.plan(&range), vec![range]);
    }
}

// ── 3. Size ──────────────────────────────────────────────────────────

proptest! {
    /// Interior chunks are one window long and never exceed the cap.
    #[test]
    fn interior_chunks_are_one_window(range in arb_range(), policy in arb_policy()) {
        let chunks = policy.plan(&range);
        prop_assume!(chunks.len() > 1);

        let window = policy.window();
        for chunk in &chunks[..chunks.len() - 1] {
            prop_assert_eq!(chunk.duration(), window);
        }
        for chunk in &chunks {
            prop_assert!(policy.estimate(chunk) <= policy.max_units());
        }
    }
}
