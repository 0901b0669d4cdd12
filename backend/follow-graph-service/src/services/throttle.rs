//! Per-follower throttle for follow mutations
//!
//! Each follower address gets its own token bucket, so one noisy account can't
//! starve others. Buckets are kept in governor's keyed state store and pruned
//! with [`FollowThrottle::retain_recent`].

use crate::domain::Address;
use crate::error::{FollowGraphError, FollowGraphResult};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

/// Throttle configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Mutations allowed per follower per minute
    pub per_minute: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: 50,
        }
    }
}

pub struct FollowThrottle {
    limiter: Option<DefaultKeyedRateLimiter<Address>>,
}

impl FollowThrottle {
    /// A zero quota behaves like a disabled throttle
    pub fn new(config: &ThrottleConfig) -> Self {
        let limiter = match NonZeroU32::new(config.per_minute) {
            Some(per_minute) if config.enabled => {
                Some(RateLimiter::keyed(Quota::per_minute(per_minute)))
            }
            _ => None,
        };
        Self { limiter }
    }

    pub fn disabled() -> Self {
        Self { limiter: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Take one token for `follower`, or fail with `RateLimited`
    pub fn check(&self, follower: &Address) -> FollowGraphResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        limiter.check_key(follower).map_err(|_| {
            debug!(follower = %follower, "Follow mutation throttled");
            FollowGraphError::RateLimited
        })
    }

    /// Drop buckets that have refilled completely
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_quota_is_per_follower() {
        let throttle = FollowThrottle::new(&ThrottleConfig {
            enabled: true,
            per_minute: 2,
        });
        let alice = addr("alice");
        let bob = addr("bob");

        assert!(throttle.check(&alice).is_ok());
        assert!(throttle.check(&alice).is_ok());
        assert!(matches!(
            throttle.check(&alice),
            Err(FollowGraphError::RateLimited)
        ));

        assert!(throttle.check(&bob).is_ok());
    }

    #[test]
    fn test_disabled_throttle_never_limits() {
        let throttle = FollowThrottle::new(&ThrottleConfig {
            enabled: false,
            per_minute: 1,
        });
        assert!(!throttle.is_enabled());

        let alice = addr("alice");
        for _ in 0..100 {
            assert!(throttle.check(&alice).is_ok());
        }
    }

    #[test]
    fn test_zero_quota_disables() {
        let throttle = FollowThrottle::new(&ThrottleConfig {
            enabled: true,
            per_minute: 0,
        });
        assert!(!throttle.is_enabled());
    }
}
