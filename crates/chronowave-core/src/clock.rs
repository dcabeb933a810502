//! Broadcast clock: where in its loop a track is "right now".
//!
//! Every session derives the position from the wall clock alone:
//!
//! ```text
//!   elapsed  = (now - epoch) / 1000 + offset_seed
//!   position = elapsed mod duration            ∈ [0, duration)
//! ```
//!
//! No messages are exchanged between sessions.  Two processes whose epochs
//! agree (for example both pinned through `player.epoch_ms`) land on the same
//! position for the same track.

use chrono::{DateTime, TimeZone, Utc};

/// Fixed "on air since" instant.  Constructed once and passed to the player;
/// never read from ambient global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastClock {
    epoch_ms: i64,
}

impl BroadcastClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch_ms: epoch.timestamp_millis(),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn from_epoch_ms(epoch_ms: i64) -> Self {
        Self { epoch_ms }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.epoch_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Seconds into the loop for a track with `offset_seed` at `now_ms`.
    ///
    /// Returns 0 when the duration is unknown, zero, negative or non-finite;
    /// the caller should not seek in that case.
    pub fn position(&self, offset_seed: u32, duration: Option<f64>, now_ms: i64) -> f64 {
        let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
            return 0.0;
        };
        let elapsed = (now_ms - self.epoch_ms) as f64 / 1000.0 + offset_seed as f64;
        let pos = elapsed.rem_euclid(duration);
        // rem_euclid can round up to exactly `duration` for tiny negative inputs
        if pos >= duration {
            0.0
        } else {
            pos
        }
    }
}

/// Dial label shown for a channel index.
pub fn frequency_mhz(index: usize) -> f64 {
    let raw = 88.1 + index as f64 * 1.2;
    (raw * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPOCH: i64 = 1_700_000_000_000;

    fn clock() -> BroadcastClock {
        BroadcastClock::from_epoch_ms(EPOCH)
    }

    #[test]
    fn unknown_or_degenerate_duration_is_zero() {
        let c = clock();
        assert_eq!(c.position(1200, None, EPOCH + 5_000), 0.0);
        assert_eq!(c.position(1200, Some(0.0), EPOCH + 5_000), 0.0);
        assert_eq!(c.position(1200, Some(f64::NAN), EPOCH + 5_000), 0.0);
        assert_eq!(c.position(1200, Some(f64::INFINITY), EPOCH + 5_000), 0.0);
        assert_eq!(c.position(1200, Some(-3.0), EPOCH + 5_000), 0.0);
    }

    #[test]
    fn adds_seed_to_elapsed_time() {
        let c = clock();
        // 10 s on air + 5 s seed inside a 100 s loop
        assert!((c.position(5, Some(100.0), EPOCH + 10_000) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn wraps_many_loops() {
        let c = clock();
        // 3 days on air, 7 s seed, 180 s track
        let now = EPOCH + 3 * 86_400 * 1000;
        let expected = ((3 * 86_400 + 7) % 180) as f64;
        assert!((c.position(7, Some(180.0), now) - expected).abs() < 1e-6);
    }

    #[test]
    fn never_negative_before_epoch() {
        let c = clock();
        let pos = c.position(0, Some(60.0), EPOCH - 90_500);
        assert!((0.0..60.0).contains(&pos), "pos={}", pos);
        assert!((pos - 29.5).abs() < 1e-9);
    }

    #[test]
    fn always_inside_loop_bounds() {
        let c = clock();
        for (seed, dur, offset) in [
            (0u32, 0.001, 123_456i64),
            (3599, 37.25, -9_999_999),
            (7199, 1.0, 86_400_000),
            (42, 12_345.678, 1),
        ] {
            let pos = c.position(seed, Some(dur), EPOCH + offset);
            assert!(pos >= 0.0 && pos < dur, "seed={} dur={} pos={}", seed, dur, pos);
        }
    }

    #[test]
    fn periodic_in_whole_loops() {
        let c = clock();
        let dur = 240.0;
        let now = EPOCH + 77_000;
        let base = c.position(900, Some(dur), now);
        for k in [1i64, 5, 1000] {
            let later = c.position(900, Some(dur), now + k * 240_000);
            assert!((base - later).abs() < 1e-6, "k={}", k);
        }
    }

    #[test]
    fn idempotent_for_same_now() {
        let c = clock();
        let a = c.position(17, Some(333.0), EPOCH + 4_242);
        let b = c.position(17, Some(333.0), EPOCH + 4_242);
        assert_eq!(a, b);
    }

    #[test]
    fn epoch_roundtrips_through_datetime() {
        let c = clock();
        assert_eq!(BroadcastClock::new(c.epoch()), c);
    }

    #[test]
    fn dial_frequencies() {
        assert_eq!(frequency_mhz(0), 88.1);
        assert_eq!(frequency_mhz(1), 89.3);
        assert_eq!(frequency_mhz(3), 91.7);
    }
}
