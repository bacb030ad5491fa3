//! Monotonic time source. All expiry math happens against this, never
//! against wall-clock time, so NTP jumps and DST changes can't resurrect
//! or prematurely kill a secret.

use std::time::{Duration, Instant as StdInstant};

/// Opaque point in monotonic time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(StdInstant);

impl Instant {
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        self.0.duration_since(earlier.0)
    }

    pub fn checked_add(&self, d: Duration) -> Option<Instant> {
        self.0.checked_add(d).map(Instant)
    }
}

/// Source of monotonic `Instant`s. A trait so tests can substitute a
/// controllable fake instead of sleeping on wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock, backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant(StdInstant::now())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A fake clock whose `now()` is the real process-start instant plus an
    /// operator-controlled offset, so tests can fast-forward past a TTL
    /// without sleeping.
    pub struct FakeClock {
        base: StdInstant,
        offset_ms: AtomicU64,
    }

    impl FakeClock {
        pub fn new() -> Self {
            FakeClock {
                base: StdInstant::now(),
                offset_ms: AtomicU64::new(0),
            }
        }

        pub fn advance(&self, d: Duration) {
            self.offset_ms
                .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            let offset = self.offset_ms.load(Ordering::SeqCst);
            Instant(self.base + Duration::from_millis(offset))
        }
    }
}
