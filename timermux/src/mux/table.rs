//! The multiplexing core: the fixed slot pool, the per-timer state
//! machine, and the expiry scheduler that keeps the hardware timer
//! armed for the soonest deadline.

use log::{debug, warn};

use crate::TIMER_CAPACITY;
use crate::hal::timer::{ExpireHandler, HwTimer, Ticks};
use crate::mux::TimerError;
use crate::mux::slot::{SlotState, TimerCallback, TimerHandle, TimerMode, TimerSlot};

/// All multiplexer state: the hardware interface, the slot pool and the
/// running-timer count.
///
/// Owns no synchronization itself; the singleton in [`crate::mux`] wraps
/// it in the guard. Methods take `&mut self`, which also makes the whole
/// core directly testable.
pub(crate) struct TimerTable {
    hw: Option<&'static dyn HwTimer>,
    slots: [TimerSlot; TIMER_CAPACITY],
    /// Number of slots with `running == true`. Its 0→1 and 1→0
    /// transitions are the only triggers for hardware start/stop.
    running_count: usize,
}

impl TimerTable {
    pub const fn new() -> Self {
        const IDLE: TimerSlot = TimerSlot::new();
        Self {
            hw: None,
            slots: [IDLE; TIMER_CAPACITY],
            running_count: 0,
        }
    }

    /// Install the hardware interface and register the expiry handler.
    ///
    /// A second call is a no-op: the hardware timer is process-wide
    /// state, wired exactly once.
    pub fn attach(&mut self, hw: &'static dyn HwTimer, handler: ExpireHandler) {
        if self.hw.is_some() {
            debug!("hardware timer already attached, ignoring re-init");
            return;
        }
        hw.register_interrupt_handler(handler);
        self.hw = Some(hw);
        debug!("hardware timer attached, pool capacity {}", TIMER_CAPACITY);
    }

    /// Claim the first slot that is not currently allocated.
    pub fn allocate(&mut self) -> Result<TimerHandle, TimerError> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Allocated {
                slot.state = SlotState::Allocated;
                slot.reset();
                return Ok(TimerHandle {
                    index,
                    generation: slot.generation,
                });
            }
        }
        warn!("timer pool exhausted ({TIMER_CAPACITY} slots)");
        Err(TimerError::PoolExhausted)
    }

    /// Return a slot to the pool, stopping it first if needed.
    ///
    /// The slot's generation is bumped, so the handle (and any copy of
    /// it) is dead from here on.
    pub fn release(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.stop(handle)?;
        let slot = &mut self.slots[handle.index];
        slot.reset();
        slot.generation = slot.generation.wrapping_add(1);
        slot.state = SlotState::Released;
        Ok(())
    }

    /// Configure a slot and set it running.
    ///
    /// Restarting an already-running timer is allowed and re-bases it:
    /// the old configuration is advanced to "now" first (other timers'
    /// deadlines stay exact), then replaced with the new one.
    pub fn start(
        &mut self,
        handle: TimerHandle,
        mode: TimerMode,
        period: Ticks,
        callback: Option<TimerCallback>,
    ) -> Result<(), TimerError> {
        self.check(handle)?;
        let hw = self.hw.ok_or(TimerError::NotInitialized)?;
        if period == 0 {
            return Err(TimerError::InvalidPeriod);
        }

        // Bookkeeping before the advance: when the hardware was idle this
        // primes the elapsed-delta baseline, so the next interrupt
        // measures from here rather than from the last time anything ran.
        let was_running = self.slots[handle.index].running;
        if !was_running {
            if self.running_count == 0 {
                hw.start();
            }
            self.running_count += 1;
        }

        self.advance();

        let slot = &mut self.slots[handle.index];
        if was_running && !slot.running {
            // The old configuration expired as a one-shot during the
            // advance and gave up its running count; take it back.
            if self.running_count == 0 {
                hw.start();
            }
            self.running_count += 1;
        }
        slot.mode = mode;
        slot.period = period;
        slot.callback = callback;
        slot.value = 0;
        slot.running = true;

        self.reprogram();
        Ok(())
    }

    /// Halt a timer. Idempotent: stopping a stopped timer is a no-op.
    pub fn stop(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.check(handle)?;
        let slot = &mut self.slots[handle.index];
        if slot.running {
            slot.running = false;
            self.running_count -= 1;
            if self.running_count == 0 {
                if let Some(hw) = self.hw {
                    hw.stop();
                }
            }
        }
        Ok(())
    }

    /// Current accumulated ticks, whether running or stopped.
    pub fn value(&self, handle: TimerHandle) -> Result<Ticks, TimerError> {
        self.check(handle)?;
        Ok(self.slots[handle.index].value)
    }

    /// Number of slots currently allocated.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Allocated)
            .count()
    }

    /// Number of slots that have ever been allocated.
    pub fn high_water(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Free)
            .count()
    }

    /// Full expiry interrupt work: advance every running timer, then
    /// re-arm the hardware for the soonest remaining deadline.
    pub fn handle_expire(&mut self) {
        self.advance();
        self.reprogram();
    }

    /// Advance all running timers by the ticks elapsed since the last
    /// scheduler pass, firing the ones that crossed their period.
    ///
    /// Queries the hardware's elapsed delta exactly once, and not at all
    /// when nothing runs.
    pub fn advance(&mut self) {
        if self.running_count == 0 {
            return;
        }
        let Some(hw) = self.hw else {
            return;
        };
        let elapsed = hw.get_elapsed();

        let bound = self.running_count;
        let mut handled = 0;
        let mut expired_once = 0;
        for slot in self.slots.iter_mut() {
            if handled == bound {
                break;
            }
            if slot.state != SlotState::Allocated || !slot.running {
                continue;
            }
            if slot.expires_after(elapsed) {
                match slot.mode {
                    TimerMode::OneShot => {
                        // Freeze at exactly the target; readers never see
                        // the overshoot of a late interrupt.
                        slot.value = slot.period;
                        slot.running = false;
                        expired_once += 1;
                    }
                    TimerMode::Periodic => {
                        // Wrap forward, keeping the overshoot, so a late
                        // interrupt does not drift the cadence. Exact
                        // even when the sum wraps the counter.
                        slot.value = slot.value.wrapping_add(elapsed).wrapping_sub(slot.period);
                    }
                }
                if let Some(callback) = slot.callback {
                    callback();
                }
            } else {
                slot.value += elapsed;
            }
            handled += 1;
        }

        self.running_count -= expired_once;
        if expired_once > 0 && self.running_count == 0 {
            hw.stop();
        }
    }

    /// Arm the hardware for the minimum remaining interval across all
    /// running timers.
    pub fn reprogram(&self) {
        // An empty minimum means no running timer is short of its period;
        // leave the previous programming untouched rather than arming a
        // zero interval.
        if let (Some(hw), Some(interval)) = (self.hw, self.shortest_remaining()) {
            hw.set_next_expire_interval(interval);
        }
    }

    fn shortest_remaining(&self) -> Option<Ticks> {
        let bound = self.running_count;
        let mut handled = 0;
        let mut shortest: Option<Ticks> = None;
        for slot in self.slots.iter() {
            if handled == bound {
                break;
            }
            if slot.state != SlotState::Allocated || !slot.running {
                continue;
            }
            if let Some(left) = slot.remaining() {
                shortest = Some(shortest.map_or(left, |s| s.min(left)));
            }
            handled += 1;
        }
        shortest
    }

    /// Reject handles whose slot was released (and possibly recycled)
    /// since they were issued.
    fn check(&self, handle: TimerHandle) -> Result<(), TimerError> {
        match self.slots.get(handle.index) {
            Some(slot)
                if slot.state == SlotState::Allocated && slot.generation == handle.generation =>
            {
                Ok(())
            }
            _ => Err(TimerError::StaleHandle),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::hal::mock::MockTimer;

    fn noop() {}

    /// Table wired to a fresh mock. The handler is a no-op: these tests
    /// drive the scheduler directly through `handle_expire`.
    fn table_with_mock() -> (TimerTable, &'static MockTimer) {
        let hw: &'static MockTimer = Box::leak(Box::new(MockTimer::new()));
        let mut table = TimerTable::new();
        table.attach(hw, noop);
        (table, hw)
    }

    fn tick(table: &mut TimerTable, hw: &MockTimer, units: Ticks) {
        hw.tick(units);
        table.handle_expire();
    }

    #[test]
    fn pool_rejects_allocation_beyond_capacity() {
        let mut table = TimerTable::new();
        let mut handles = [None; TIMER_CAPACITY];
        for slot in handles.iter_mut() {
            *slot = Some(table.allocate().unwrap());
        }
        assert_eq!(table.allocate(), Err(TimerError::PoolExhausted));

        table.release(handles[0].unwrap()).unwrap();
        assert!(table.allocate().is_ok());
    }

    #[test]
    fn diagnostics_track_allocation_history() {
        let mut table = TimerTable::new();
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.high_water(), 0);

        let first = table.allocate().unwrap();
        let second = table.allocate().unwrap();
        assert_eq!(table.active_count(), 2);
        assert_eq!(table.high_water(), 2);

        table.release(first).unwrap();
        assert_eq!(table.active_count(), 1);
        // Released slots still count toward the high-water mark.
        assert_eq!(table.high_water(), 2);
        let _ = second;
    }

    #[test]
    fn released_handle_is_rejected_even_after_reuse() {
        let (mut table, _hw) = table_with_mock();
        let old = table.allocate().unwrap();
        table.release(old).unwrap();

        // The slot is recycled by the next allocation, but the old
        // handle's generation no longer matches.
        let fresh = table.allocate().unwrap();
        assert_eq!(fresh.index, old.index);
        assert_eq!(
            table.start(old, TimerMode::OneShot, 100, None),
            Err(TimerError::StaleHandle)
        );
        assert_eq!(table.value(old), Err(TimerError::StaleHandle));
        assert_eq!(table.stop(old), Err(TimerError::StaleHandle));
        assert!(table.value(fresh).is_ok());
    }

    #[test]
    fn start_requires_attached_hardware() {
        let mut table = TimerTable::new();
        let handle = table.allocate().unwrap();
        assert_eq!(
            table.start(handle, TimerMode::OneShot, 100, None),
            Err(TimerError::NotInitialized)
        );
    }

    #[test]
    fn zero_period_is_rejected() {
        let (mut table, _hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        assert_eq!(
            table.start(handle, TimerMode::Periodic, 0, None),
            Err(TimerError::InvalidPeriod)
        );
    }

    #[test]
    fn one_shot_freezes_at_exact_period() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table
            .start(handle, TimerMode::OneShot, 500, Some(fired))
            .unwrap();

        // The interrupt is late: 130 ticks of overshoot.
        tick(&mut table, hw, 630);

        assert_eq!(table.value(handle), Ok(500));
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn one_shot_expiry_releases_the_hardware() {
        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table.start(handle, TimerMode::OneShot, 100, None).unwrap();
        assert_eq!(hw.starts(), 1);

        tick(&mut table, hw, 100);

        // Last running timer expired: 1→0, so the hardware stops too.
        assert_eq!(hw.stops(), 1);
    }

    #[test]
    fn periodic_wraps_overshoot_forward() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table
            .start(handle, TimerMode::Periodic, 200, Some(fired))
            .unwrap();

        tick(&mut table, hw, 210);
        assert_eq!(table.value(handle), Ok(10));
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);

        // The overshoot is carried, not dropped: the next boundary is
        // 190 ticks away, so cadence holds at exactly one period.
        tick(&mut table, hw, 190);
        assert_eq!(table.value(handle), Ok(0));
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn periodic_catches_up_after_multi_period_gap() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn fired() {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table
            .start(handle, TimerMode::Periodic, 100, Some(fired))
            .unwrap();

        // Two and a half periods in one late interrupt: one period is
        // retired per scheduler pass.
        tick(&mut table, hw, 350);
        assert_eq!(table.value(handle), Ok(250));
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);

        tick(&mut table, hw, 0);
        assert_eq!(table.value(handle), Ok(150));
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);

        tick(&mut table, hw, 0);
        assert_eq!(table.value(handle), Ok(50));
        assert_eq!(FIRED.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn hardware_gating_fires_only_on_edge_transitions() {
        let (mut table, hw) = table_with_mock();
        let first = table.allocate().unwrap();
        let second = table.allocate().unwrap();

        table.start(first, TimerMode::Periodic, 100, None).unwrap();
        assert_eq!(hw.starts(), 1);

        // A second running timer must not start the hardware again.
        table.start(second, TimerMode::Periodic, 300, None).unwrap();
        assert_eq!(hw.starts(), 1);

        table.stop(first).unwrap();
        assert_eq!(hw.stops(), 0);

        table.stop(second).unwrap();
        assert_eq!(hw.stops(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut table, hw) = table_with_mock();
        let first = table.allocate().unwrap();
        table.start(first, TimerMode::Periodic, 100, None).unwrap();

        table.stop(first).unwrap();
        table.stop(first).unwrap();
        assert_eq!(hw.stops(), 1);

        // The count reached zero exactly once: a new start is a fresh
        // 0→1 edge.
        table.start(first, TimerMode::Periodic, 100, None).unwrap();
        assert_eq!(hw.starts(), 2);
    }

    #[test]
    fn early_interrupt_finds_nothing_and_rearms() {
        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table.start(handle, TimerMode::OneShot, 500, None).unwrap();
        assert_eq!(hw.time_to_expire(), 500);

        // Hardware fires 400 ticks early: no expiry, deadline recomputed.
        tick(&mut table, hw, 100);
        assert_eq!(table.value(handle), Ok(100));
        assert_eq!(hw.time_to_expire(), 400);
    }

    #[test]
    fn deadline_is_minimum_across_running_timers() {
        let (mut table, hw) = table_with_mock();
        let slow = table.allocate().unwrap();
        let fast = table.allocate().unwrap();

        table.start(slow, TimerMode::OneShot, 500, None).unwrap();
        assert_eq!(hw.time_to_expire(), 500);
        table.start(fast, TimerMode::Periodic, 200, None).unwrap();
        assert_eq!(hw.time_to_expire(), 200);
    }

    #[test]
    fn value_stays_readable_after_stop() {
        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table.start(handle, TimerMode::Periodic, 400, None).unwrap();
        tick(&mut table, hw, 150);

        table.stop(handle).unwrap();
        assert_eq!(table.value(handle), Ok(150));
    }

    #[test]
    fn restart_rebases_the_accumulated_value() {
        let (mut table, hw) = table_with_mock();
        let handle = table.allocate().unwrap();
        table.start(handle, TimerMode::OneShot, 500, None).unwrap();
        tick(&mut table, hw, 300);
        assert_eq!(table.value(handle), Ok(300));

        // Restart with a new period: the value starts over.
        table.start(handle, TimerMode::OneShot, 800, None).unwrap();
        assert_eq!(table.value(handle), Ok(0));
        assert_eq!(hw.time_to_expire(), 800);
        // Still one hardware start: the timer never stopped running.
        assert_eq!(hw.starts(), 1);
    }
}
