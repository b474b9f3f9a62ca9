//! Outgoing request throttle built on governor.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

const FALLBACK_REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Shared rate limit for RPC and DAS requests.
pub struct RequestThrottle {
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
}

impl RequestThrottle {
    pub fn new(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(FALLBACK_REQUESTS_PER_SECOND);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            requests_per_second: rate.get(),
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            debug!("Request throttled at {} req/s", self.requests_per_second);
            self.limiter.until_ready().await;
        }
    }

    /// Take a permit without waiting; false when the quota is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_bounded() {
        let throttle = RequestThrottle::new(3);
        let granted = (0..10).filter(|_| throttle.try_acquire()).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn test_zero_rate_falls_back() {
        assert_eq!(RequestThrottle::new(0).requests_per_second(), 10);
    }

    #[tokio::test]
    async fn test_acquire_within_quota_is_immediate() {
        let throttle = RequestThrottle::new(100);
        for _ in 0..5 {
            throttle.acquire().await;
        }
    }
}
