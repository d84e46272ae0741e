//! Per-slot bookkeeping for the timer pool.

use crate::hal::timer::Ticks;

/// Allocation state of a pool slot.
///
/// `Released` is distinct from `Free` so the pool can report how many
/// slots were ever handed out (see [`crate::mux::high_water`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Never allocated.
    Free,
    /// Allocated at some point, then released.
    Released,
    /// Currently owned by a caller.
    Allocated,
}

/// Timer operating mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerMode {
    /// Timer fires once after the period elapses, then stops.
    OneShot,
    /// Timer automatically reloads and fires every period.
    Periodic,
}

/// Callback invoked when a timer crosses its period.
///
/// Runs in interrupt context with the timer table locked: it must do
/// minimal work (set a flag, wake a task) and must not call back into
/// the timer API.
pub type TimerCallback = fn();

/// Handle to an allocated timer slot.
///
/// A pool index plus a generation tag. The tag is bumped every time the
/// slot is released, so a handle kept past [`crate::mux::release`] is
/// detected and rejected instead of silently operating on a recycled
/// slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl TimerHandle {
    /// Pool slot index this handle refers to. Useful for diagnostics;
    /// slot reuse means an index alone does not identify a timer.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// One entry of the fixed timer pool.
#[derive(Debug, Copy, Clone)]
pub(crate) struct TimerSlot {
    pub state: SlotState,
    pub generation: u32,
    pub running: bool,
    pub mode: TimerMode,
    /// Ticks accumulated since (re)start. Below `period` while running,
    /// except transiently after a late interrupt wrapped a periodic
    /// timer past a full extra period.
    pub value: Ticks,
    pub period: Ticks,
    pub callback: Option<TimerCallback>,
}

impl TimerSlot {
    pub const fn new() -> Self {
        Self {
            state: SlotState::Free,
            generation: 0,
            running: false,
            mode: TimerMode::OneShot,
            value: 0,
            period: 0,
            callback: None,
        }
    }

    /// Reset the timer configuration to the idle defaults.
    ///
    /// Leaves `state` and `generation` alone: those belong to the pool,
    /// not the timer.
    pub fn reset(&mut self) {
        self.running = false;
        self.mode = TimerMode::OneShot;
        self.value = 0;
        self.period = 0;
        self.callback = None;
    }

    /// Whether this timer crosses its period after `elapsed` more ticks.
    ///
    /// Computed by comparing against `period - elapsed` rather than
    /// adding to `value`, so the answer stays exact when `value +
    /// elapsed` would overflow the counter. The subtraction cannot
    /// underflow: it is only reached when `elapsed < period`.
    pub fn expires_after(&self, elapsed: Ticks) -> bool {
        elapsed >= self.period || self.value >= self.period - elapsed
    }

    /// Ticks left until this timer's period, `None` once reached.
    pub fn remaining(&self) -> Option<Ticks> {
        if self.value < self.period {
            Some(self.period - self.value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(value: Ticks, period: Ticks) -> TimerSlot {
        let mut slot = TimerSlot::new();
        slot.value = value;
        slot.period = period;
        slot
    }

    /// Reference predicate in wider arithmetic.
    fn expires_exact(value: Ticks, period: Ticks, elapsed: Ticks) -> bool {
        u64::from(value) + u64::from(elapsed) >= u64::from(period)
    }

    #[test]
    fn expiry_matches_exact_arithmetic() {
        let cases = [
            (0, 1, 0),
            (0, 1, 1),
            (999, 1000, 1),
            (999, 1000, 0),
            (0, u32::MAX, u32::MAX),
            (0, u32::MAX, u32::MAX - 1),
            (u32::MAX - 1, u32::MAX, 1),
            (u32::MAX - 1, u32::MAX, u32::MAX),
            (1, u32::MAX, u32::MAX - 2),
            (1, u32::MAX, u32::MAX - 1),
        ];
        for (value, period, elapsed) in cases {
            assert_eq!(
                slot(value, period).expires_after(elapsed),
                expires_exact(value, period, elapsed),
                "value={value} period={period} elapsed={elapsed}"
            );
        }
    }

    #[test]
    fn no_false_negative_near_counter_max() {
        // value + elapsed wraps the counter; the naive sum would look
        // tiny and miss the expiry.
        let slot = slot(u32::MAX - 10, u32::MAX);
        assert!(slot.expires_after(20));
    }

    #[test]
    fn remaining_counts_down_to_none() {
        assert_eq!(slot(0, 500).remaining(), Some(500));
        assert_eq!(slot(499, 500).remaining(), Some(1));
        assert_eq!(slot(500, 500).remaining(), None);
        assert_eq!(slot(700, 500).remaining(), None);
    }

    #[test]
    fn reset_preserves_pool_fields() {
        let mut slot = TimerSlot::new();
        slot.state = SlotState::Allocated;
        slot.generation = 3;
        slot.running = true;
        slot.mode = TimerMode::Periodic;
        slot.value = 42;
        slot.period = 100;
        slot.callback = Some(|| {});

        slot.reset();

        assert_eq!(slot.state, SlotState::Allocated);
        assert_eq!(slot.generation, 3);
        assert!(!slot.running);
        assert_eq!(slot.mode, TimerMode::OneShot);
        assert_eq!(slot.value, 0);
        assert_eq!(slot.period, 0);
        assert!(slot.callback.is_none());
    }
}
