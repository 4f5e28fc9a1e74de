/*
 * ritex - cooperative real-time executive
 *
 * A priority-based scheduler that multiplexes a fixed, compile-time-bounded
 * set of threads over one hardware call stack, together with the
 * synchronization primitives the threads block on. Built for constrained
 * single-CPU devices: no per-thread stacks, no dynamic memory, no
 * preemption between threads - yet correct when interrupt handlers race
 * thread-mode code, because every shared structure is manipulated with
 * lock-free compare-and-swap.
 *
 * ## The pieces
 *
 * - `kernel`: the executive instance - thread table, scheduler, event
 *   engine, public pend/post surface
 * - `sync`: semaphore, mutex (with priority hoisting), signal set, and the
 *   delay sentinel
 * - `queue`: the lock-free MPMC / SPSC / MPSC buffers between interrupt
 *   and thread context
 * - `timer`: periodic and one-shot software timers on a service thread
 * - `platform`: the hardware seam, with a hosted implementation for
 *   tests, simulation and demos
 * - `bitmap`, `tagged`, `cpu`: the atomic substrate everything above
 *   stands on
 *
 * ## Scheduling model
 *
 * A thread's ID is its priority: 1..=31, bigger wins, each unique. Threads
 * yield only at pend/post/delay points (cooperative); an interrupt that
 * frees a higher-priority thread pends the scheduler, which dispatches it
 * on interrupt exit (preemptive across priorities). The scheduler never
 * runs concurrently with itself; that one guarantee, supplied by the
 * platform, is what the rest of the design leans on.
 */

#![cfg_attr(not(test), no_std)]

pub mod bitmap;
pub mod config;
pub mod cpu;
pub mod kernel;
pub mod platform;
pub mod queue;
pub mod sync;
pub mod tagged;
pub mod timer;

pub use kernel::{
    time_diff, Control, Kernel, ThreadFn, ThreadId, WAIT_FOREVER, WAIT_MAX, WAIT_NONE,
};
pub use platform::{HostedPlatform, Platform};
pub use queue::{Linked, MpmcQueue, MpscStack, SpscRing, StackLink};
pub use sync::{ObjectKind, Status, StatusCell, SyncObject, ValueCell};
pub use timer::{Timer, TimerFlags, TimerFn};
