//! Bit-exact packing of a token count and a millisecond timestamp into one `u64`.
//!
//! ```text
//!  63            48 47                                             0
//! +----------------+------------------------------------------------+
//! |     tokens     |              last update (unix ms)             |
//! +----------------+------------------------------------------------+
//! ```

use crate::LimitError;

/// Width of the timestamp field.
pub const TIMESTAMP_BITS: u32 = 48;

/// Mask selecting the timestamp field. Also the largest encodable timestamp.
pub const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Splits a packed state into `(tokens, last_update_ms)`.
#[inline]
pub const fn decode(packed: u64) -> (u16, u64) {
    ((packed >> TIMESTAMP_BITS) as u16, packed & TIMESTAMP_MASK)
}

/// Packs `tokens` into the high 16 bits and `last_update_ms` into the low 48 bits.
///
/// # Errors
///
/// Returns [`LimitError::TimestampOverflow`] if `last_update_ms >= 2^48`.
#[inline]
pub const fn try_encode(tokens: u16, last_update_ms: u64) -> Result<u64, LimitError> {
    if last_update_ms > TIMESTAMP_MASK {
        return Err(LimitError::TimestampOverflow {
            value: last_update_ms,
        });
    }
    Ok(((tokens as u64) << TIMESTAMP_BITS) | last_update_ms)
}

/// Packs `tokens` and `last_update_ms` into a single word.
///
/// # Panics
///
/// Panics if `last_update_ms >= 2^48`. Out of range timestamps are a
/// programming error and are never silently truncated.
#[inline]
#[track_caller]
pub fn encode(tokens: u16, last_update_ms: u64) -> u64 {
    match try_encode(tokens, last_update_ms) {
        Ok(packed) => packed,
        Err(e) => panic!("{e}"),
    }
}
