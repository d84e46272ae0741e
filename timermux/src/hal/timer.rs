//! Hardware Timer Abstraction Layer.
//!
//! This module defines the platform-independent trait for the single
//! countdown/compare timer peripheral the multiplexer is built on.

/// Abstract duration type reported and consumed by the hardware timer.
///
/// One tick is whatever the peripheral counts in (microseconds on most
/// platforms); the multiplexer never assumes a real-world scale.
pub type Ticks = u32;

/// Expiry interrupt handler installed into the hardware timer.
///
/// Plain function pointer so it can be registered with bare-metal
/// interrupt machinery without requiring `alloc`.
pub type ExpireHandler = fn();

/// Hardware timer trait.
///
/// This trait represents the one scarce countdown/compare peripheral.
/// Implementations hand out interrupts and elapsed time; all scheduling
/// policy lives above in [`crate::mux`].
///
/// Methods take `&self`: timer peripherals are register blocks with
/// their own interior mutability, and the installed instance is shared
/// with interrupt context for the process lifetime.
pub trait HwTimer: Sync {
    /// Install `handler` as the sole expiry interrupt handler.
    ///
    /// Called once during multiplexer initialization.
    fn register_interrupt_handler(&self, handler: ExpireHandler);

    /// Schedule the next expiry interrupt `interval` ticks from now.
    ///
    /// The hardware is allowed to fire earlier than requested (e.g. a
    /// counter too narrow for the interval), but must never refuse a
    /// later re-arm.
    fn set_next_expire_interval(&self, interval: Ticks);

    /// Enable the timer counting and its interrupt.
    ///
    /// Optional: always-on peripherals keep the default no-op.
    fn start(&self) {}

    /// Disable the timer, e.g. to save power while no timers run.
    ///
    /// Optional: always-on peripherals keep the default no-op.
    fn stop(&self) {}

    /// Return the ticks elapsed since the previous call to this method.
    ///
    /// A stateful monotonic delta, not an absolute time: the peripheral
    /// (or its driver) keeps the reference point of the last query.
    fn get_elapsed(&self) -> Ticks;
}
