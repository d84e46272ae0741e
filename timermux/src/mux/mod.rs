//! Timer multiplexing over a single hardware timer.
//!
//! A fixed pool of software timers shares the one countdown/compare
//! peripheral: every running timer accumulates the elapsed ticks the
//! hardware reports, and the hardware is kept armed for the soonest
//! remaining deadline across the pool.
//!
//! # Module Organization
//!
//! - [`slot`]: per-slot types (handles, modes, the slot record)
//! - `table`: the slot pool and the expiry scheduler
//! - this module: the process-wide instance, the interrupt entry point,
//!   and the public API
//!
//! # Interrupt protocol
//!
//! The expiry interrupt races against application calls that mutate the
//! same table. Both sides go through one [`DeferLock`]: application
//! calls spin for it (the interrupt's critical section is short and
//! bounded), while the interrupt only tries it. A locked-out interrupt
//! records itself as deferred and returns; whoever held the lock replays
//! the full interrupt work after releasing, so an expiry check can be
//! delayed but never lost.
//!
//! # Usage
//!
//! ```ignore
//! timermux::init(&SYSTEM_TIMER);
//!
//! let blink = timermux::allocate()?;
//! timermux::start(blink, TimerMode::Periodic, 500_000, Some(toggle_led))?;
//!
//! // ... later ...
//! timermux::stop(blink)?;
//! timermux::release(blink)?;
//! ```

pub mod slot;
pub(crate) mod table;

use common::sync::DeferLock;

use crate::hal::timer::{HwTimer, Ticks};
use slot::{TimerCallback, TimerHandle, TimerMode};
use table::TimerTable;

/// Errors reported by the timer API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// Every pool slot is currently allocated.
    PoolExhausted,
    /// No hardware timer has been installed via [`init`].
    NotInitialized,
    /// The handle's slot was released since the handle was issued.
    StaleHandle,
    /// A period of zero ticks was requested.
    InvalidPeriod,
}

/// The process-wide timer table behind the interrupt/application guard.
static TIMERS: DeferLock<TimerTable> = DeferLock::new(TimerTable::new());

/// Expiry interrupt entry point, registered with the hardware by
/// [`init`].
///
/// Never blocks: if the table is locked by an application call, the
/// work is recorded as deferred and the lock holder replays it.
fn expire_interrupt() {
    match TIMERS.try_lock() {
        Some(mut table) => {
            TIMERS.clear_deferred();
            table.handle_expire();
        }
        None => TIMERS.defer(),
    }
}

/// Replay expiry work that an interrupt deferred while we held the lock.
///
/// Loops because the replay itself runs with interrupts live: a fresh
/// interrupt can be deferred against the replay's own critical section.
fn replay_deferred() {
    while TIMERS.take_deferred() {
        expire_interrupt();
    }
}

/// Run `f` on the table under the guard, then replay deferred work.
///
/// Application-context counterpart of [`expire_interrupt`]; every public
/// operation goes through here. Only a path that runs the scheduler may
/// consume the deferred flag, so it is left alone on entry: a pending
/// expiry pass belongs to the replay on the way out.
fn with_table<R>(f: impl FnOnce(&mut TimerTable) -> R) -> R {
    let mut table = TIMERS.lock();
    let result = f(&mut table);
    drop(table);
    replay_deferred();
    result
}

/// Install the hardware timer and register the expiry interrupt handler.
///
/// Call once at startup, before any [`start`]. Repeated calls are
/// no-ops.
pub fn init(hw: &'static dyn HwTimer) {
    with_table(|table| table.attach(hw, expire_interrupt));
}

/// Claim a timer slot from the pool.
pub fn allocate() -> Result<TimerHandle, TimerError> {
    with_table(|table| table.allocate())
}

/// Return a slot to the pool, stopping it first if it is running.
///
/// The handle and all copies of it are invalid afterwards; further use
/// fails with [`TimerError::StaleHandle`].
pub fn release(handle: TimerHandle) -> Result<(), TimerError> {
    with_table(|table| table.release(handle))
}

/// Start (or restart) a timer.
///
/// The timer fires `period` ticks from now, once or repeatedly per
/// `mode`. `callback` runs in interrupt context when it fires: keep it
/// minimal and do not call the timer API from it.
pub fn start(
    handle: TimerHandle,
    mode: TimerMode,
    period: Ticks,
    callback: Option<TimerCallback>,
) -> Result<(), TimerError> {
    with_table(|table| table.start(handle, mode, period, callback))
}

/// Stop a timer. Idempotent; its accumulated value stays readable.
pub fn stop(handle: TimerHandle) -> Result<(), TimerError> {
    with_table(|table| table.stop(handle))
}

/// Ticks accumulated by a timer since it was last started.
///
/// For an expired one-shot timer this is exactly its period.
pub fn value(handle: TimerHandle) -> Result<Ticks, TimerError> {
    with_table(|table| table.value(handle))
}

/// Number of slots currently allocated.
pub fn active_count() -> usize {
    with_table(|table| table.active_count())
}

/// Number of slots that have ever been allocated, the pool's high-water
/// mark.
pub fn high_water() -> usize {
    with_table(|table| table.high_water())
}
