//! Process-local rate-limit circuit breaker.
//!
//! Once the quote provider answers with 429, every quote request is short-circuited until the
//! cooldown window has elapsed. The state lives in memory only and resets on restart.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Source of "now" for cooldown bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }

    /// Jump to `at` past the clock's origin.
    pub fn set_elapsed(&self, at: Duration) {
        *self.offset.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct RateLimitGuard {
    window: Duration,
    clock: Arc<dyn Clock>,
    limited_until: Mutex<Option<Instant>>,
}

impl RateLimitGuard {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            limited_until: Mutex::new(None),
        }
    }

    /// A poisoned lock still holds a usable timestamp, so recover instead of panicking.
    fn lock_until(&self) -> MutexGuard<'_, Option<Instant>> {
        self.limited_until.lock().unwrap_or_else(|poisoned| {
            warn!("Rate-limit guard mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_limited(&self) -> bool {
        let now = self.clock.now();
        match *self.lock_until() {
            Some(until) if now < until => {
                debug!(
                    "Quote provider rate limited, {}s of cooldown remaining",
                    (until - now).as_secs()
                );
                true
            }
            _ => false,
        }
    }

    /// Start (or extend) the cooldown from now. An expiry already further out is kept.
    pub fn trigger(&self) {
        let candidate = self.clock.now() + self.window;
        let mut until = self.lock_until();
        let next = match *until {
            Some(current) if current > candidate => current,
            _ => candidate,
        };
        *until = Some(next);
        warn!(
            "Quote provider returned 429, pausing requests for {}s",
            self.window.as_secs()
        );
    }

    /// Time left before requests are allowed again; zero when not limited.
    pub fn remaining(&self) -> Duration {
        let now = self.clock.now();
        self.lock_until()
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_COOLDOWN;

    fn guard_with_manual_clock() -> (RateLimitGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let guard = RateLimitGuard::with_clock(DEFAULT_COOLDOWN, clock.clone());
        (guard, clock)
    }

    #[test]
    fn not_limited_until_triggered() {
        let (guard, _clock) = guard_with_manual_clock();
        assert_eq!(guard.window(), Duration::from_secs(300));
        assert!(!guard.is_limited());
        assert_eq!(guard.remaining(), Duration::ZERO);
    }

    #[test]
    fn stays_limited_for_the_full_window() {
        let (guard, clock) = guard_with_manual_clock();
        guard.trigger();

        clock.set_elapsed(Duration::from_millis(299_999));
        assert!(guard.is_limited());
        assert_eq!(guard.remaining(), Duration::from_millis(1));

        clock.set_elapsed(Duration::from_millis(300_000));
        assert!(!guard.is_limited());
        assert_eq!(guard.remaining(), Duration::ZERO);
    }

    #[test]
    fn retrigger_extends_from_now() {
        let (guard, clock) = guard_with_manual_clock();
        guard.trigger();

        clock.advance(Duration::from_secs(200));
        guard.trigger();

        clock.set_elapsed(Duration::from_secs(400));
        assert!(guard.is_limited());
        clock.set_elapsed(Duration::from_secs(500));
        assert!(!guard.is_limited());
    }

    #[test]
    fn never_shortens_an_existing_cooldown() {
        let clock = Arc::new(ManualClock::new());
        let long = RateLimitGuard::with_clock(Duration::from_secs(600), clock.clone());
        long.trigger();

        // Same state, shorter window: a later trigger must not pull the expiry in.
        let short = RateLimitGuard {
            window: Duration::from_secs(60),
            clock: clock.clone(),
            limited_until: Mutex::new(*long.lock_until()),
        };
        short.trigger();

        clock.set_elapsed(Duration::from_secs(300));
        assert!(short.is_limited());
    }
}
