use std::time::Duration;

/// Misuse of the packed-state encoding or of limiter construction.
///
/// Refusals are not errors: they are reported through
/// [`Reason`](crate::Reason) on the ordinary return path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// A timestamp does not fit in the 48 low bits of a packed state.
    #[error("timestamp {value} overflows 48 bits")]
    TimestampOverflow { value: u64 },

    /// The refill interval rounds down to zero milliseconds.
    #[error("interval must be at least one millisecond, got {0:?}")]
    IntervalTooShort(Duration),

    /// A limiter needs at least one compare-and-swap attempt.
    #[error("retries must be non-zero")]
    ZeroRetries,
}
