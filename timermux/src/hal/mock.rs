//! Scripted hardware timer for host-side tests.
//!
//! `MockTimer` stands in for the real peripheral: tests feed it ticks
//! with [`MockTimer::tick`], and it fires the registered expiry handler
//! on every tick call while started, including when the programmed
//! deadline has not been reached yet, since real hardware is allowed to
//! interrupt early.

use spin::Mutex;

use super::timer::{ExpireHandler, HwTimer, Ticks};

struct Inner {
    handler: Option<ExpireHandler>,
    /// Total ticks fed in while started.
    counter: u64,
    /// Value of `counter` at the previous `get_elapsed` call.
    last_query: u64,
    /// Absolute counter value of the programmed expiry.
    expire_at: u64,
    running: bool,
    starts: u32,
    stops: u32,
}

/// Mock implementation of [`HwTimer`] backed by a scripted counter.
pub struct MockTimer {
    inner: Mutex<Inner>,
}

impl MockTimer {
    /// Create a stopped mock with no handler registered.
    ///
    /// `const` so instances can live in `static`s shared with the
    /// multiplexer singleton under test.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handler: None,
                counter: 0,
                last_query: 0,
                expire_at: u64::MAX,
                running: false,
                starts: 0,
                stops: 0,
            }),
        }
    }

    /// Advance the scripted clock by `units` ticks and raise the expiry
    /// interrupt.
    ///
    /// Does nothing while the timer is stopped. The handler is invoked
    /// outside the internal lock because it will call back into
    /// [`HwTimer::get_elapsed`].
    pub fn tick(&self, units: Ticks) {
        let handler = {
            let mut inner = self.inner.lock();
            if !inner.running {
                return;
            }
            inner.counter += u64::from(units);
            inner.handler
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Ticks remaining until the programmed expiry, 0 while stopped.
    pub fn time_to_expire(&self) -> Ticks {
        let inner = self.inner.lock();
        if inner.running {
            inner.expire_at.saturating_sub(inner.counter) as Ticks
        } else {
            0
        }
    }

    /// Number of `start` calls observed.
    pub fn starts(&self) -> u32 {
        self.inner.lock().starts
    }

    /// Number of `stop` calls observed.
    pub fn stops(&self) -> u32 {
        self.inner.lock().stops
    }
}

impl HwTimer for MockTimer {
    fn register_interrupt_handler(&self, handler: ExpireHandler) {
        self.inner.lock().handler = Some(handler);
    }

    fn set_next_expire_interval(&self, interval: Ticks) {
        let mut inner = self.inner.lock();
        inner.expire_at = inner.counter + u64::from(interval);
    }

    fn start(&self) {
        let mut inner = self.inner.lock();
        inner.running = true;
        inner.starts += 1;
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.stops += 1;
    }

    fn get_elapsed(&self) -> Ticks {
        let mut inner = self.inner.lock();
        let elapsed = (inner.counter - inner.last_query) as Ticks;
        inner.last_query = inner.counter;
        elapsed
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new()
    }
}
