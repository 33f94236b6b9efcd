//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter allowing `per_second` cells with a burst of `burst`
pub fn create_limiter(per_second: u32, burst: u32) -> Arc<Limiter> {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
}

/// Paddle frames per second a connection may send
pub const PADDLE_RATE_LIMIT: u32 = 30;

/// Key mashing allowance on top of the steady rate
pub const PADDLE_BURST: u32 = 10;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    paddle_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            paddle_limiter: create_limiter(PADDLE_RATE_LIMIT, PADDLE_BURST),
        }
    }

    /// Check if a paddle frame is allowed (returns true if allowed)
    pub fn check_paddle(&self) -> bool {
        self.paddle_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_allowed_then_throttled() {
        let limiter = ConnectionRateLimiter::new();
        let allowed = (0..PADDLE_BURST * 3).filter(|_| limiter.check_paddle()).count();
        assert!(allowed >= PADDLE_BURST as usize);
        assert!(allowed < (PADDLE_BURST * 3) as usize);
    }
}
