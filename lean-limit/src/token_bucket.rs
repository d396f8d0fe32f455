use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use super::LimitError;
use super::PackedState;
use super::Reason;
use super::Strategy;
use super::UnixClock;
use super::codec;

/// Compare-and-swap attempts made by a take before reporting contention.
pub const DEFAULT_RETRIES: NonZeroUsize = NonZeroUsize::new(5).unwrap();

/// A token bucket whose per-identity state lives in a caller-owned [`PackedState`].
///
/// The limiter itself only holds configuration, so one instance serves any
/// number of identities. Tokens accrue continuously at `burst / interval`
/// per millisecond, capped at `burst`, and are recomputed lazily on every
/// access.
///
/// Refill uses `f64` arithmetic truncated toward zero, so a single access may
/// under-refill by a fraction of a token.
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    burst: u16,
    refill_per_ms: f64,
    retries: NonZeroUsize,
    clock: UnixClock,
}

impl Strategy for TokenBucketLimiter {
    fn create_state(&self) -> PackedState {
        PackedState::from_bits(codec::encode(self.burst, 0))
    }

    fn take_n(&self, state: &PackedState, requests: u16) -> ControlFlow<Reason> {
        if requests == 0 {
            return ControlFlow::Continue(());
        }
        if requests > self.burst {
            return ControlFlow::Break(Reason::Oversized);
        }

        for _ in 0..self.retries.get() {
            let current = state.load();
            let (available, now) = self.refill(current);

            if requests > available {
                return ControlFlow::Break(Reason::Exhausted {
                    retry_after: self.retry_after(requests - available),
                });
            }

            let next = codec::encode(available - requests, now);
            if state.compare_exchange(current, next) {
                return ControlFlow::Continue(());
            }
        }

        trace!(
            requests,
            retries = self.retries.get(),
            "gave up on contended state"
        );
        ControlFlow::Break(Reason::Contended)
    }
}

impl TokenBucketLimiter {
    /// Allows `burst` requests per `interval`, with a burst capacity of `burst`.
    ///
    /// A `burst` of zero is accepted; every non-zero request is then refused
    /// as [`Reason::Oversized`].
    ///
    /// # Panics
    ///
    /// Panics if `interval` is shorter than one millisecond.
    #[track_caller]
    pub fn new(burst: u16, interval: Duration) -> Self {
        Self::with_clock(burst, interval, UnixClock::new())
    }

    /// Allows `burst` requests per second.
    pub fn per_second(burst: u16) -> Self {
        Self::new(burst, Duration::from_secs(1))
    }

    /// Like [`TokenBucketLimiter::new`], reading time from `clock`.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is shorter than one millisecond.
    #[track_caller]
    pub fn with_clock(burst: u16, interval: Duration, clock: UnixClock) -> Self {
        match Self::try_with_clock(burst, interval, clock) {
            Ok(limiter) => limiter,
            Err(e) => panic!("{e}"),
        }
    }

    pub(crate) fn try_with_clock(
        burst: u16,
        interval: Duration,
        clock: UnixClock,
    ) -> Result<Self, LimitError> {
        let interval_ms = interval.as_millis();
        if interval_ms == 0 {
            return Err(LimitError::IntervalTooShort(interval));
        }
        Ok(Self {
            burst,
            refill_per_ms: f64::from(burst) / interval_ms as f64,
            retries: DEFAULT_RETRIES,
            clock,
        })
    }

    /// Sets how many compare-and-swap attempts a take makes before it gives
    /// up with [`Reason::Contended`].
    pub fn with_retries(mut self, retries: NonZeroUsize) -> Self {
        self.retries = retries;
        self
    }

    /// The bucket capacity, also the largest request that can ever be admitted.
    pub fn burst(&self) -> u16 {
        self.burst
    }

    /// Tokens added per elapsed millisecond.
    pub fn refill_per_ms(&self) -> f64 {
        self.refill_per_ms
    }

    pub fn retries(&self) -> NonZeroUsize {
        self.retries
    }

    pub fn clock(&self) -> &UnixClock {
        &self.clock
    }

    /// Returns the tokens available now and the timestamp to store with them.
    #[inline]
    fn refill(&self, packed: u64) -> (u16, u64) {
        let (tokens, last_update_ms) = codec::decode(packed);
        let now = self.clock.now_ms();

        let elapsed = match now.checked_sub(last_update_ms) {
            Some(elapsed) => elapsed,
            None => {
                debug!(now, last_update_ms, "state updated in the future, no refill");
                0
            }
        };

        // Float to int casts saturate, so the never-updated sentinel (0)
        // simply fills the bucket.
        let refilled = (self.refill_per_ms * elapsed as f64) as u64;
        let available = u64::from(tokens)
            .saturating_add(refilled)
            .min(u64::from(self.burst));

        (available as u16, now)
    }

    /// Time until `missing` more tokens will have accrued, plus a millisecond.
    #[inline]
    fn retry_after(&self, missing: u16) -> Duration {
        let wait_ms = 1.0 + (f64::from(missing) / self.refill_per_ms).ceil();
        Duration::from_millis(wait_ms as u64)
    }
}
