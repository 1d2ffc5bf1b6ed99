//! Support for specifying rate limits for calling external APIs.
//!
//! Free tiers of OCR services are typically limited to a handful of calls per
//! minute, and every status poll counts as a call.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// The period over which the rate limit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    /// Per second.
    Second,
    /// Per minute.
    Minute,
}

impl RateLimitPeriod {
    /// How long is this period?
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }

    /// Suffix used in the textual form.
    fn suffix(self) -> &'static str {
        match self {
            RateLimitPeriod::Second => "s",
            RateLimitPeriod::Minute => "m",
        }
    }
}

impl FromStr for RateLimitPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        [RateLimitPeriod::Second, RateLimitPeriod::Minute]
            .into_iter()
            .find(|period| period.suffix() == s)
            .ok_or_else(|| anyhow!("Unsupported rate limit period: {:?}", s))
    }
}

/// A rate limit for an API, like `20/m`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in the period.
    pub max_requests: usize,
    /// The period over which the rate limit is applied.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Create a [`RateLimiter`] for this rate limit.
    ///
    /// The bucket starts full, so a burst of up to `max_requests` is allowed
    /// right after startup.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(self.max_requests)
            .max(self.max_requests)
            .interval(self.per_period.to_duration())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period.suffix())
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let (count, period) = s
                .split_once('/')
                .ok_or_else(|| anyhow!("expected COUNT/PERIOD"))?;
            let max_requests = count.trim().parse::<usize>()?;
            if max_requests == 0 {
                return Err(anyhow!("rate limit must allow at least one request"));
            }
            Ok(Self {
                max_requests,
                per_period: period.trim().parse()?,
            })
        };
        parse(s).with_context(|| format!("Failed to parse rate limit: {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let rate_limit = RateLimit::from_str("20/m").unwrap();
        assert_eq!(rate_limit.max_requests, 20);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Minute);
        assert_eq!(rate_limit.to_string(), "20/m");

        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Second);
    }

    #[test]
    fn test_failed_parse() {
        assert!(RateLimit::from_str("10/h").is_err());
        assert!(RateLimit::from_str("0/s").is_err());
        assert!(RateLimit::from_str("ten").is_err());
    }
}
