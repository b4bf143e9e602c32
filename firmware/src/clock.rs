//! Millisecond time sources for debounce and macro pacing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Milliseconds since an arbitrary, fixed origin.
pub type Millis = u64;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Monotonic clock backed by `tokio::time::Instant`, so it follows the
/// runtime's paused clock under test.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: Millis) -> Self {
        let clock = Self::new();
        clock.set(now);
        clock
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: Millis) -> Millis {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::starting_at(5);
        let other = clock.clone();
        assert_eq!(clock.advance(10), 15);
        assert_eq!(other.now_ms(), 15);
        other.set(100);
        assert_eq!(clock.now_ms(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_paused_runtime() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.now_ms(), 0);
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 250);
    }
}
