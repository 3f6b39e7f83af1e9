use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

const WINDOW: Duration = Duration::from_secs(3600);

/// Sliding-window claim limiter: at most `max_per_hour` successful claims in
/// any rolling hour, with a minimum spacing between consecutive claims.
///
/// Only successful claims count against the window; an admitted attempt that
/// finds no eligible job consumes nothing. The permit is held across the
/// claim attempt, so concurrent in-process claimants cannot overshoot the
/// window between check and commit.
pub struct RateLimiter {
    state: Mutex<LimiterWindow>,
}

impl RateLimiter {
    pub fn new(max_per_hour: u32, min_delay: Duration, enabled: bool) -> Self {
        Self {
            state: Mutex::new(LimiterWindow::new(max_per_hour, min_delay, enabled)),
        }
    }

    /// Ask to start a claim attempt at `now`. `None` means the window or the
    /// spacing rule forbids a claim right now. On a successful claim the
    /// caller commits the permit; dropping it uncommitted releases the slot.
    pub async fn admit(&self, now: Instant) -> Option<ClaimPermit<'_>> {
        let mut guard = self.state.lock().await;
        if guard.admits(now) {
            Some(ClaimPermit { guard })
        } else {
            None
        }
    }
}

/// Exclusive permission to attempt one claim.
pub struct ClaimPermit<'a> {
    guard: MutexGuard<'a, LimiterWindow>,
}

impl ClaimPermit<'_> {
    /// Count a successful claim against the window.
    pub fn commit(mut self, now: Instant) {
        self.guard.record(now);
    }
}

/// Pure window state. Callers pass `now` explicitly, which keeps the
/// arithmetic testable without waiting out real windows.
#[derive(Debug)]
pub struct LimiterWindow {
    max_per_window: u32,
    min_delay: Duration,
    enabled: bool,
    claims: VecDeque<Instant>,
    last_claim: Option<Instant>,
}

impl LimiterWindow {
    fn new(max_per_window: u32, min_delay: Duration, enabled: bool) -> Self {
        Self {
            max_per_window,
            min_delay,
            enabled,
            claims: VecDeque::new(),
            last_claim: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.claims.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.claims.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn admits(&mut self, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        self.prune(now);
        if self.claims.len() >= self.max_per_window as usize {
            return false;
        }
        if let Some(last) = self.last_claim {
            if now.saturating_duration_since(last) < self.min_delay {
                return false;
            }
        }
        true
    }

    pub fn record(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }
        self.claims.push_back(now);
        self.last_claim = Some(now);
    }
}
