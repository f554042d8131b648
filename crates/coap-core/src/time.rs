//! Injectable clock abstraction, with a real and a test-controlled impl.
//!
//! # Design (Why)
//! - The reliability timer and the exchange expiration wheel both need a
//!   time source that tests can drive deterministically; calling
//!   `Instant::now()`/`thread::sleep` directly throughout the stack would
//!   make timing-sensitive scenarios like retransmission backoff flaky to
//!   test.
//! - [`SystemClock`] is the production default; [`MockClock`] lets tests
//!   advance time explicitly and wakes any outstanding [`Sleep`] futures/
//!   waiters whose deadline has passed.
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Abstract time source used by the reliability layer and the exchange
/// store's expiration wheel.
///
/// # Contract (What)
/// - `now` is monotonic.
/// - `sleep_for` blocks the calling thread until at least `duration` has
///   elapsed according to this clock (not necessarily wall time, for
///   [`MockClock`]).
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep_for(&self, duration: Duration);
}

/// Production clock: delegates directly to `std::time`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_for(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Test clock: `now()` is a virtual counter advanced only by [`MockClock::advance`].
/// `sleep_for` blocks the calling thread on a condvar until the virtual clock
/// has advanced past the requested deadline, which lets tests run
/// retransmission/backoff scenarios without real wall-clock delay.
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<(Mutex<Instant>, Condvar)>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(Instant::now()), Condvar::new())),
        }
    }

    /// Advance the virtual clock and wake any thread blocked in `sleep_for`.
    pub fn advance(&self, by: Duration) {
        let (lock, cvar) = &*self.inner;
        let mut now = lock.lock().unwrap();
        *now += by;
        cvar.notify_all();
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.inner.0.lock().unwrap()
    }

    fn sleep_for(&self, duration: Duration) {
        let (lock, cvar) = &*self.inner;
        let deadline = *lock.lock().unwrap() + duration;
        let mut now = lock.lock().unwrap();
        while *now < deadline {
            now = cvar.wait(now).unwrap();
        }
    }
}
