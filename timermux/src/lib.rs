//! Software Timer Multiplexer
//!
//! Multiplexes one scarce hardware countdown/compare timer into a fixed
//! pool of independent software timers, each with its own period, mode
//! and expiry callback. Built for bare-metal targets where subsystems
//! outnumber timer peripherals.
//!
//! # Module Organization
//!
//! - [`hal`]: Platform-independent hardware timer trait (plus a mock
//!   for host-side tests)
//! - [`mux`]: The multiplexing core and public API
//!
//! # Design Principles
//!
//! 1. **One hardware query per pass**: elapsed time is read once and
//!    applied to every running timer
//! 2. **Overflow-safe arithmetic**: expiry detection never computes a
//!    sum that can wrap the counter
//! 3. **Interrupts never blocked, never lost**: the expiry interrupt
//!    defers to in-progress API calls and is replayed by them
//! 4. **Fail fast on misuse**: stale handles are rejected, not obeyed
//!
//! # Usage Example
//!
//! ```ignore
//! use timermux::TimerMode;
//!
//! timermux::init(&SYSTEM_TIMER);
//! let heartbeat = timermux::allocate()?;
//! timermux::start(heartbeat, TimerMode::Periodic, 1_000_000, Some(beat))?;
//! ```

#![cfg_attr(not(test), no_std)]

pub mod hal;
pub mod mux;

pub use hal::timer::{ExpireHandler, HwTimer, Ticks};
pub use mux::slot::{TimerCallback, TimerHandle, TimerMode};
pub use mux::{
    TimerError, active_count, allocate, high_water, init, release, start, stop, value,
};

// Pool capacity selection based on Cargo features
cfg_if::cfg_if! {
    if #[cfg(feature = "capacity-32")] {
        /// Number of slots in the timer pool.
        pub const TIMER_CAPACITY: usize = 32;
    } else if #[cfg(feature = "capacity-16")] {
        /// Number of slots in the timer pool.
        pub const TIMER_CAPACITY: usize = 16;
    } else {
        /// Number of slots in the timer pool.
        pub const TIMER_CAPACITY: usize = 8;
    }
}

// Ensure only one capacity is selected
#[cfg(all(feature = "capacity-16", feature = "capacity-32"))]
compile_error!("Multiple pool capacities selected! Choose only one: capacity-16 OR capacity-32");
