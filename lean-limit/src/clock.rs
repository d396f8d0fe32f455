use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quanta::Clock;
use quanta::Instant;

/// Unix time in milliseconds, as seen by a [`TokenBucketLimiter`](crate::TokenBucketLimiter).
///
/// The Unix offset is sampled from the system clock once, at construction,
/// and then advanced by quanta's monotonic counter. Readings from one
/// `UnixClock` therefore never go backwards, but they also do not follow
/// wall-clock corrections (NTP steps, manual changes) made after
/// construction. Clocks built at different times, or in different processes
/// sharing a state, can drift apart this way. The limiter's refill treats a
/// stored timestamp that is ahead of its own reading as zero elapsed time,
/// so that drift never produces extra tokens.
#[derive(Debug, Clone)]
pub struct UnixClock {
    clock: Clock,
    /// A fixed point on `clock` to calculate deltas from.
    anchor: Instant,
    /// Unix milliseconds at `anchor`.
    epoch_ms: u64,
}

impl UnixClock {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Uses `clock` for elapsed time and the system clock for the Unix offset.
    pub fn with_clock(clock: Clock) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or_default();
        Self::with_epoch(clock, epoch_ms)
    }

    /// Pins the Unix offset. Combined with [`Clock::mock`] this gives a fully
    /// deterministic time source.
    pub fn with_epoch(clock: Clock, epoch_ms: u64) -> Self {
        let anchor = clock.now();
        Self {
            clock,
            anchor,
            epoch_ms,
        }
    }

    /// Current Unix time in milliseconds.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.anchor);
        self.epoch_ms.saturating_add(elapsed.as_millis() as u64)
    }
}

impl Default for UnixClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use more_asserts::assert_ge;
    use more_asserts::assert_le;

    use super::*;

    #[test]
    fn it_follows_the_mock() {
        let (clock, mock) = Clock::mock();
        let unix = UnixClock::with_epoch(clock, 1_000);
        assert_eq!(unix.now_ms(), 1_000);

        mock.increment(Duration::from_millis(250));
        assert_eq!(unix.now_ms(), 1_250);

        // Sub-millisecond progress is truncated.
        mock.increment(Duration::from_micros(999));
        assert_eq!(unix.now_ms(), 1_250);
    }

    #[test]
    fn it_samples_the_system_clock_only_once() {
        let (clock, _mock) = Clock::mock();
        let unix = UnixClock::with_clock(clock);
        let first = unix.now_ms();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(unix.now_ms(), first);
    }

    #[test]
    fn it_tracks_the_system_clock() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let now = UnixClock::new().now_ms();
        assert_ge!(now, before);
        assert_le!(now, before + 1_000);
    }
}
