/*
 * Platform Contract
 *
 * The seam between the portable executive and whatever supplies its time
 * base, interrupt state and scheduler trigger. The kernel holds exactly one
 * `&'static dyn Platform` and consumes nothing else from the hardware:
 * compare-and-swap and count-leading-zeros come from `cpu`, everything
 * below comes through this trait.
 *
 * A bare-metal port implements this over its tick interrupt and its
 * pend-the-scheduler exception; the bundled `HostedPlatform` implements it
 * over plain atomics for tests, simulation, and the console demo.
 */

pub mod hosted;

pub use hosted::HostedPlatform;

/// Hardware services the kernel consumes.
pub trait Platform: Sync {
    /// Monotonic milliseconds since the kernel started. May be adjusted by
    /// [`Platform::advance_ms`] when the idle hook stops the tick source.
    fn time_ms(&self) -> u32;

    /// Microseconds elapsed within the current millisecond, 0..=999.
    fn time_us_part(&self) -> u32 {
        0
    }

    /// 0 in thread mode, otherwise the active exception number.
    fn in_interrupt(&self) -> u32;

    /// Mark the scheduler for an immediate re-run. Idempotent; callable
    /// from any context.
    fn pend_scheduler(&self);

    /// Consume a pending scheduler request. The trampoline polls this
    /// after every scheduler pass.
    fn take_scheduler_pend(&self) -> bool;

    /// Add `ms` to the kernel clock. Called by the scheduler with whatever
    /// the idle hook reports it slept while the tick source was stopped.
    fn advance_ms(&self, ms: u32);

    /// Called when no thread is runnable.
    ///
    /// `sleep_for_ms` is the time until the next pending thread timeout,
    /// negative if one has already expired, or 0 if none is pending. The
    /// hook may stop the CPU but must not block on kernel objects; it
    /// returns the milliseconds it actually spent so the clock can be
    /// corrected.
    fn idle_hook(&self, sleep_for_ms: i32) -> u32;
}
