//! Display-progress smoothing.
//!
//! Provider progress is coarse and often sits still for long stretches.
//! [`smooth_progress`] turns it into a value that never regresses and keeps
//! creeping forward between real updates. Increments are random, so
//! callers should rely on monotonicity and bounds, not exact values.

use rand::Rng;

/// Raw progress at or below this is the upload/preprocess phase.
pub const PREPROCESS_RAW_CEILING: i16 = 10;
/// Display cap while preprocessing.
pub const PREPROCESS_DISPLAY_CAP: i16 = 20;
/// Raw progress at or above this is reported as-is.
pub const FINISHING_RAW_FLOOR: i16 = 90;
/// Display cap while generating.
pub const GENERATE_DISPLAY_CAP: i16 = 90;
/// Highest value shown before the provider reports success.
pub const MAX_NON_TERMINAL_PROGRESS: i16 = 99;
/// Shown once the provider reports success.
pub const COMPLETE_PROGRESS: i16 = 100;

/// Which smoothing policy applies to a raw provider value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingPhase {
    Preprocess,
    Generate,
    Finishing,
}

impl SmoothingPhase {
    pub fn classify(raw: i16) -> Self {
        if raw <= PREPROCESS_RAW_CEILING {
            Self::Preprocess
        } else if raw < FINISHING_RAW_FLOOR {
            Self::Generate
        } else {
            Self::Finishing
        }
    }
}

/// Next displayed progress for a non-terminal poll.
///
/// A missing raw value is read as "no change since last display". The
/// result is always within `previous..=MAX_NON_TERMINAL_PROGRESS`.
pub fn smooth_progress<R: Rng + ?Sized>(previous: i16, raw: Option<i16>, rng: &mut R) -> i16 {
    let previous = previous.clamp(0, MAX_NON_TERMINAL_PROGRESS);
    let raw = raw.unwrap_or(previous).clamp(0, COMPLETE_PROGRESS);

    let candidate = match SmoothingPhase::classify(raw) {
        SmoothingPhase::Preprocess => {
            (previous + rng.random_range(1..=2)).min(PREPROCESS_DISPLAY_CAP)
        }
        SmoothingPhase::Generate => (previous + rng.random_range(1..=3)).min(GENERATE_DISPLAY_CAP),
        SmoothingPhase::Finishing => raw.min(MAX_NON_TERMINAL_PROGRESS),
    };
    candidate.max(previous)
}

/// Map a stage-local 0-100 value into the `(low, high)` band a stage owns
/// on the overall record.
pub fn scale_to_band(local: i16, (low, high): (i16, i16)) -> i16 {
    let local = i32::from(local.clamp(0, COMPLETE_PROGRESS));
    let span = i32::from(high - low);
    // Bounded by `high`, which is itself an i16.
    (i32::from(low) + local * span / 100) as i16
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(SmoothingPhase::classify(0), SmoothingPhase::Preprocess);
        assert_eq!(SmoothingPhase::classify(10), SmoothingPhase::Preprocess);
        assert_eq!(SmoothingPhase::classify(11), SmoothingPhase::Generate);
        assert_eq!(SmoothingPhase::classify(89), SmoothingPhase::Generate);
        assert_eq!(SmoothingPhase::classify(90), SmoothingPhase::Finishing);
    }

    #[test]
    fn preprocess_creeps_but_caps_at_twenty() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut shown = 0;
        for _ in 0..50 {
            let next = smooth_progress(shown, Some(5), &mut rng);
            assert!(next >= shown);
            assert!(next - shown <= 2);
            shown = next;
        }
        assert_eq!(shown, PREPROCESS_DISPLAY_CAP);
    }

    #[test]
    fn generate_caps_at_ninety() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut shown = 20;
        for _ in 0..100 {
            let next = smooth_progress(shown, Some(50), &mut rng);
            assert!(next >= shown);
            assert!(next - shown <= 3);
            shown = next;
        }
        assert_eq!(shown, GENERATE_DISPLAY_CAP);
    }

    #[test]
    fn finishing_snaps_to_raw() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(smooth_progress(40, Some(93), &mut rng), 93);
    }

    #[test]
    fn raw_hundred_before_success_stays_below_complete() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            smooth_progress(95, Some(100), &mut rng),
            MAX_NON_TERMINAL_PROGRESS
        );
    }

    #[test]
    fn never_regresses_when_raw_drops() {
        let mut rng = StdRng::seed_from_u64(3);
        // Past the preprocess cap already; a low raw value must not pull it back.
        assert_eq!(smooth_progress(60, Some(2), &mut rng), 60);
        assert_eq!(smooth_progress(95, Some(40), &mut rng), 95);
    }

    #[test]
    fn missing_raw_still_advances_early() {
        let mut rng = StdRng::seed_from_u64(5);
        let next = smooth_progress(0, None, &mut rng);
        assert!((1..=2).contains(&next));
    }

    #[test]
    fn arbitrary_sequences_are_monotonic_and_bounded() {
        let mut rng = StdRng::seed_from_u64(42);
        let raws = [None, Some(0), Some(12), None, Some(8), Some(55), Some(91), Some(30), Some(100)];
        let mut shown = 0;
        for _ in 0..10 {
            for raw in raws {
                let next = smooth_progress(shown, raw, &mut rng);
                assert!(next >= shown, "{next} < {shown} for raw {raw:?}");
                assert!((0..=MAX_NON_TERMINAL_PROGRESS).contains(&next));
                shown = next;
            }
        }
    }

    #[test]
    fn band_scaling() {
        assert_eq!(scale_to_band(0, (0, 50)), 0);
        assert_eq!(scale_to_band(100, (0, 50)), 50);
        assert_eq!(scale_to_band(50, (50, 99)), 74);
        assert_eq!(scale_to_band(100, (50, 99)), 99);
        assert_eq!(scale_to_band(100, (0, 99)), 99);
    }
}
