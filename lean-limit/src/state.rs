use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::codec;

/// The entire limiter state of one identity, packed into one atomic word.
///
/// A `PackedState` is created by [`Strategy::create_state`](crate::Strategy::create_state)
/// and owned by the caller, typically as the value of a map keyed by IP
/// address or API key. The limiter only ever borrows it.
///
/// Serializes as the raw `u64` so the bit layout described in
/// [`codec`] survives a round trip through storage.
#[repr(transparent)]
pub struct PackedState(AtomicU64);

impl PackedState {
    /// Wraps a raw packed word.
    pub const fn from_bits(bits: u64) -> Self {
        Self(AtomicU64::new(bits))
    }

    /// Snapshot of the raw packed word.
    pub fn bits(&self) -> u64 {
        self.load()
    }

    /// Consumes the cell, returning the raw packed word.
    pub fn into_bits(self) -> u64 {
        self.0.into_inner()
    }

    /// Tokens available as of the last successful update.
    ///
    /// This is the stored value; it does not include refill accrued since.
    pub fn tokens(&self) -> u16 {
        codec::decode(self.bits()).0
    }

    /// Unix milliseconds of the last successful update, `0` if never updated.
    pub fn last_update_ms(&self) -> u64 {
        codec::decode(self.bits()).1
    }

    #[inline]
    pub(crate) fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn compare_exchange(&self, current: u64, new: u64) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl From<u64> for PackedState {
    fn from(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

impl fmt::Debug for PackedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tokens, last_update_ms) = codec::decode(self.bits());
        f.debug_struct("PackedState")
            .field("tokens", &tokens)
            .field("last_update_ms", &last_update_ms)
            .finish()
    }
}

impl Serialize for PackedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for PackedState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_exposes_decoded_fields() {
        let state = PackedState::from_bits(codec::encode(12, 1_700_000_000_000));
        assert_eq!(state.tokens(), 12);
        assert_eq!(state.last_update_ms(), 1_700_000_000_000);
        assert_eq!(
            format!("{state:?}"),
            "PackedState { tokens: 12, last_update_ms: 1700000000000 }"
        );
    }

    #[test]
    fn it_swaps_only_from_the_expected_word() {
        let state = PackedState::from(codec::encode(3, 10));
        let current = state.load();
        assert_eq!(current, state.bits());

        assert!(!state.compare_exchange(current + 1, 0));
        assert_eq!(state.bits(), current);

        assert!(state.compare_exchange(current, codec::encode(2, 11)));
        assert_eq!(state.into_bits(), codec::encode(2, 11));
    }

    #[test]
    fn it_serializes_as_the_raw_word() {
        let bits = codec::encode(0xBEEF, 0x1234_5678_9ABC);
        let state = PackedState::from_bits(bits);

        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, bits.to_string());

        let restored: PackedState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.bits(), bits);
    }
}
