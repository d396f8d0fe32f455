//! # lean-limit
//!
//! `lean-limit` is a per-identity token bucket whose entire state fits in a
//! single `u64`.
//!
//! ## Core Philosophy
//!
//! Keyed rate limiters usually keep a struct, a mutex, or a heap allocation per
//! key. At millions of keys (one per IP address or API key) that overhead
//! dominates. `lean-limit` packs a key's token count and last update time into
//! one [`PackedState`] word that the caller stores wherever it likes, and
//! updates it with a bounded atomic Compare-And-Swap (CAS) loop.
//!
//! ## Key Concepts
//!
//! * **One Word Per Identity**: 16 bits of tokens, 48 bits of Unix milliseconds.
//!   See [`codec`] for the exact layout.
//! * **Stateless Policy**: a [`TokenBucketLimiter`] only holds configuration and
//!   can be shared by every identity it governs.
//! * **Lock-Free, Non-Blocking**: no `Mutex`, no sleeping. A take makes at most
//!   a fixed number of CAS attempts and then answers.
//! * **Lazy Refill**: tokens are recalculated at the moment of the request;
//!   there is no background timer.
//!
//! ## Example
//!
//! ```rust
//! use std::ops::ControlFlow;
//! use std::time::Duration;
//!
//! use lean_limit::Reason;
//! use lean_limit::Strategy;
//! use lean_limit::TokenBucketLimiter;
//! use lean_limit::WaitHint;
//!
//! // 100 requests per minute, bursts of up to 100.
//! let limiter = TokenBucketLimiter::new(100, Duration::from_secs(60));
//! let state = limiter.create_state();
//!
//! if limiter.take1_if_allowed(&state) {
//!     // Request allowed
//! }
//!
//! match limiter.take_n(&state, 10) {
//!     ControlFlow::Continue(()) => {}
//!     ControlFlow::Break(reason) => println!("retry in {}ms", reason.wait_millis()),
//! }
//!
//! assert_eq!(limiter.take_n(&state, 101), ControlFlow::Break(Reason::Oversized));
//! assert_eq!(limiter.take_n(&state, 101).hint(), (i64::MAX, false));
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod clock;
pub mod codec;
mod config;
mod error;
mod state;
mod token_bucket;


pub use clock::UnixClock;
pub use config::LimiterConfig;
pub use error::LimitError;
pub use state::PackedState;
pub use token_bucket::DEFAULT_RETRIES;
pub use token_bucket::TokenBucketLimiter;

/// Reasons why a take might be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Not enough tokens have accrued yet.
    Exhausted { retry_after: Duration },
    /// More tokens were requested than the bucket can ever hold.
    Oversized,
    /// Every CAS attempt lost a race with a concurrent writer. Tokens may well
    /// be available, so a prompt retry is reasonable.
    Contended,
}

impl Reason {
    /// Suggested wait in milliseconds before retrying.
    ///
    /// `i64::MAX` for [`Reason::Oversized`], since waiting never helps, and
    /// `1` for [`Reason::Contended`].
    pub fn wait_millis(&self) -> i64 {
        match self {
            Self::Exhausted { retry_after } => {
                i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX)
            }
            Self::Oversized => i64::MAX,
            Self::Contended => 1,
        }
    }
}

/// The `(wait_millis, admitted)` view of a take outcome.
pub trait WaitHint {
    /// `0` when admitted, otherwise [`Reason::wait_millis`].
    fn wait_millis(&self) -> i64;

    fn admitted(&self) -> bool;

    fn hint(&self) -> (i64, bool) {
        (self.wait_millis(), self.admitted())
    }
}

impl WaitHint for ControlFlow<Reason> {
    fn wait_millis(&self) -> i64 {
        match self {
            ControlFlow::Continue(()) => 0,
            ControlFlow::Break(reason) => reason.wait_millis(),
        }
    }

    fn admitted(&self) -> bool {
        self.is_continue()
    }
}

/// A rate-limiting policy applied to caller-owned [`PackedState`] cells.
///
/// Implementations must be safe to call concurrently on the *same* state
/// from many threads. A refused take never modifies the state.
pub trait Strategy: Debug {
    /// A brand-new, zero-use state. Call this once per identity and keep it.
    fn create_state(&self) -> PackedState;

    /// Attempts to consume `requests` tokens from `state`.
    ///
    /// This method is non-blocking and uses a bounded number of atomic
    /// operations.
    ///
    /// Zero requests are always admitted and leave `state` untouched.
    ///
    /// # Errors
    ///
    /// Breaks with a [`Reason`] if the tokens cannot be taken right now.
    fn take_n(&self, state: &PackedState, requests: u16) -> ControlFlow<Reason>;

    fn take1(&self, state: &PackedState) -> ControlFlow<Reason> {
        self.take_n(state, 1)
    }

    /// Boolean form of [`Strategy::take_n`].
    fn take_n_if_allowed(&self, state: &PackedState, requests: u16) -> bool {
        self.take_n(state, requests).is_continue()
    }

    fn take1_if_allowed(&self, state: &PackedState) -> bool {
        self.take_n_if_allowed(state, 1)
    }
}

#[cfg(test)]
mod reason_tests {
    use super::*;

    #[test]
    fn it_maps_reasons_to_wait_hints() {
        let exhausted = Reason::Exhausted {
            retry_after: Duration::from_millis(250),
        };
        assert_eq!(exhausted.wait_millis(), 250);
        assert_eq!(Reason::Oversized.wait_millis(), i64::MAX);
        assert_eq!(Reason::Contended.wait_millis(), 1);

        assert_eq!(ControlFlow::<Reason>::Continue(()).hint(), (0, true));
        assert_eq!(ControlFlow::Break(exhausted).hint(), (250, false));
        assert_eq!(ControlFlow::Break(Reason::Contended).hint(), (1, false));
    }
}
