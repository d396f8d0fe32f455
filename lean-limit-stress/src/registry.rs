use std::ops::ControlFlow;

use dashmap::DashMap;
use dashmap::mapref::one::Ref;

use lean_limit::PackedState;
use lean_limit::Reason;
use lean_limit::Strategy;
use lean_limit::TokenBucketLimiter;

/// Caller-owned map from identity to its packed limiter state.
///
/// The limiter never sees the map: it is handed one borrowed
/// [`PackedState`] per call. Lookups of existing identities only take a shard
/// read lock, so concurrent takes on the same identity race on the atomic
/// word rather than on the map.
#[derive(Debug)]
pub struct Registry {
    limiter: TokenBucketLimiter,
    states: DashMap<u64, PackedState>,
}

impl Registry {
    pub fn new(limiter: TokenBucketLimiter) -> Self {
        Self {
            limiter,
            states: DashMap::new(),
        }
    }

    pub fn limiter(&self) -> &TokenBucketLimiter {
        &self.limiter
    }

    /// Number of identities seen so far.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn take_n(&self, identity: u64, requests: u16) -> ControlFlow<Reason> {
        let state = self.state(identity);
        self.limiter.take_n(&state, requests)
    }

    /// Stored token count of `identity`, if it has been seen.
    pub fn tokens(&self, identity: u64) -> Option<u16> {
        self.states.get(&identity).map(|state| state.tokens())
    }

    fn state(&self, identity: u64) -> Ref<'_, u64, PackedState> {
        if let Some(state) = self.states.get(&identity) {
            return state;
        }
        self.states
            .entry(identity)
            .or_insert_with(|| self.limiter.create_state())
            .downgrade()
    }
}
