/*
 * Hosted Platform
 *
 * A Platform implementation with no hardware behind it: the millisecond
 * clock is advanced explicitly (by a test, by the idle hook's report, or by
 * a driver loop), interrupt context is simulated by setting an exception
 * level, and the scheduler pend is a plain flag.
 *
 * This is what the test suites and the console demo run on. A test
 * typically:
 *
 * 1. leaks a `HostedPlatform` and a `Kernel` built over it,
 * 2. creates threads and steps `dispatch_once`,
 * 3. advances the clock with `tick` and calls `Kernel::on_tick`,
 * 4. wraps interrupt-context calls in `enter_interrupt`/`exit_interrupt`.
 */

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use super::Platform;

/// An idle hook: gets the ms until the next thread timeout (see
/// [`Platform::idle_hook`]), returns the ms it slept.
pub type IdleHookFn = fn(sleep_for_ms: i32) -> u32;

pub struct HostedPlatform {
    ms: AtomicU32,
    us: AtomicU32,
    interrupt_level: AtomicU32,
    sched_pend: AtomicBool,
    idle_hook: Mutex<Option<IdleHookFn>>,
}

impl HostedPlatform {
    pub const fn new() -> Self {
        Self {
            ms: AtomicU32::new(0),
            us: AtomicU32::new(0),
            interrupt_level: AtomicU32::new(0),
            sched_pend: AtomicBool::new(false),
            idle_hook: Mutex::new(None),
        }
    }

    /// Advance the simulated clock by `ms` milliseconds.
    pub fn tick(&self, ms: u32) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the simulated clock to an absolute value.
    pub fn set_time(&self, ms: u32) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    /// Set the sub-millisecond part reported by `time_us_part`.
    pub fn set_us_part(&self, us: u32) {
        self.us.store(us, Ordering::SeqCst);
    }

    /// Enter simulated interrupt context at the given exception level.
    pub fn enter_interrupt(&self, level: u32) {
        debug_assert!(level != 0);
        self.interrupt_level.store(level, Ordering::SeqCst);
    }

    /// Return to simulated thread mode.
    pub fn exit_interrupt(&self) {
        self.interrupt_level.store(0, Ordering::SeqCst);
    }

    /// Install the hook run when no thread is runnable.
    pub fn set_idle_hook(&self, hook: IdleHookFn) {
        *self.idle_hook.lock() = Some(hook);
    }

    /// Peek at the scheduler-pend flag without consuming it.
    pub fn scheduler_pended(&self) -> bool {
        self.sched_pend.load(Ordering::SeqCst)
    }
}

impl Platform for HostedPlatform {
    fn time_ms(&self) -> u32 {
        self.ms.load(Ordering::SeqCst)
    }

    fn time_us_part(&self) -> u32 {
        self.us.load(Ordering::SeqCst)
    }

    fn in_interrupt(&self) -> u32 {
        self.interrupt_level.load(Ordering::SeqCst)
    }

    fn pend_scheduler(&self) {
        self.sched_pend.store(true, Ordering::SeqCst);
    }

    fn take_scheduler_pend(&self) -> bool {
        self.sched_pend.swap(false, Ordering::SeqCst)
    }

    fn advance_ms(&self, ms: u32) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    fn idle_hook(&self, sleep_for_ms: i32) -> u32 {
        match *self.idle_hook.lock() {
            Some(hook) => hook(sleep_for_ms),
            None => 0,
        }
    }
}
