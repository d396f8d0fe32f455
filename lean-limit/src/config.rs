use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::LimitError;
use crate::TokenBucketLimiter;
use crate::UnixClock;
use crate::token_bucket::DEFAULT_RETRIES;

/// Declarative construction parameters for a [`TokenBucketLimiter`].
///
/// ```rust
/// use lean_limit::LimiterConfig;
///
/// let config: LimiterConfig = serde_json::from_str(r#"{ "burst": 100, "interval_ms": 60000 }"#)?;
/// let limiter = config.build()?;
/// assert_eq!(limiter.burst(), 100);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    /// Requests allowed per interval, also the burst capacity.
    pub burst: u16,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Compare-and-swap attempts per take.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_retries() -> usize {
    DEFAULT_RETRIES.get()
}

impl LimiterConfig {
    pub fn per_second(burst: u16) -> Self {
        Self {
            burst,
            interval_ms: default_interval_ms(),
            retries: default_retries(),
        }
    }

    pub fn validate(&self) -> Result<(), LimitError> {
        if self.interval_ms == 0 {
            return Err(LimitError::IntervalTooShort(Duration::ZERO));
        }
        if self.retries == 0 {
            return Err(LimitError::ZeroRetries);
        }
        Ok(())
    }

    pub fn build(&self) -> Result<TokenBucketLimiter, LimitError> {
        self.build_with_clock(UnixClock::new())
    }

    pub fn build_with_clock(&self, clock: UnixClock) -> Result<TokenBucketLimiter, LimitError> {
        self.validate()?;
        let retries = NonZeroUsize::new(self.retries).ok_or(LimitError::ZeroRetries)?;
        let interval = Duration::from_millis(self.interval_ms);
        Ok(TokenBucketLimiter::try_with_clock(self.burst, interval, clock)?.with_retries(retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_fills_in_defaults() {
        let config: LimiterConfig = serde_json::from_str(r#"{ "burst": 25 }"#).unwrap();
        assert_eq!(config, LimiterConfig::per_second(25));
        assert_eq!(config.interval_ms, 1_000);
        assert_eq!(config.retries, 5);
    }

    #[test]
    fn it_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<LimiterConfig>(r#"{ "burst": 1, "rps": 2 }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn it_builds_a_limiter() {
        let config = LimiterConfig {
            burst: 100,
            interval_ms: 60_000,
            retries: 8,
        };
        let limiter = config.build().unwrap();
        assert_eq!(limiter.burst(), 100);
        assert_eq!(limiter.retries().get(), 8);
        assert!((limiter.refill_per_ms() - 100.0 / 60_000.0).abs() < 1e-12);
    }

    #[test]
    fn it_reports_invalid_settings() {
        let mut config = LimiterConfig::per_second(10);
        config.interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(LimitError::IntervalTooShort(Duration::ZERO))
        );
        assert!(matches!(
            config.build(),
            Err(LimitError::IntervalTooShort(_))
        ));

        let mut config = LimiterConfig::per_second(10);
        config.retries = 0;
        assert_eq!(config.validate(), Err(LimitError::ZeroRetries));
        assert!(matches!(config.build(), Err(LimitError::ZeroRetries)));
    }

    #[test]
    fn it_builds_with_the_same_verdict_as_validate() {
        let mut config = LimiterConfig::per_second(10);
        config.interval_ms = 0;
        config.retries = 0;

        assert_eq!(
            config.validate(),
            Err(LimitError::IntervalTooShort(Duration::ZERO))
        );
        assert_eq!(config.build().map(|_| ()), config.validate());

        config.interval_ms = 1;
        assert_eq!(config.build().map(|_| ()), Err(LimitError::ZeroRetries));

        config.retries = 1;
        assert_eq!(config.build().map(|_| ()), Ok(()));
    }

    #[test]
    fn it_accepts_a_zero_burst() {
        let config = LimiterConfig::per_second(0);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.build().unwrap().burst(), 0);
    }
}
