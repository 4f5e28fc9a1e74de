/*
 * Software Timer Service
 *
 * Timers are plain callbacks, not threads: a dedicated service thread
 * (created by `enable_timer_service`) owns a linked list of active timers,
 * fires the expired ones, and sleeps on its signal set until the next
 * expiry or the next command.
 *
 * The public operations never touch the active list themselves. They set
 * command bits in the timer's control word, hand new timers over through a
 * lock-free MPSC list, and post the service signal; the service thread
 * applies everything the next time it runs. That makes every operation
 * callable from any context, at the cost of the usual caveat: after
 * `timer_remove`, the control block may only be reused once its ACTIVE
 * status bit has dropped.
 *
 * ## Expiry bookkeeping
 *
 * - `interval`: ms between periodic firings; 0 makes the timer a one-shot
 *   (which stays active and can be started again).
 * - `remaining`: ms to expiry for a stopped timer, and the start delay
 *   loaded by `timer_start` - so a periodic timer's first firing may use a
 *   different delay than its period.
 * - `expiry`: absolute kernel time of the next firing.
 *
 * A periodic timer re-arms at previous_expiry + interval, preserving the
 * long-term period when the service runs late; only when it slips by a
 * full interval or more does the phase reset to now + interval.
 */

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::kernel::{time_diff, Control, Kernel, WAIT_MAX};
use crate::queue::{Linked, MpscStack, StackLink};
use crate::sync::{Status, StatusCell, SyncObject, ValueCell};

bitflags! {
    /// Timer control and status bits. The low byte is status, readable
    /// through [`Kernel::timer_status`]; the rest are commands consumed by
    /// the service thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerFlags: u32 {
        /// Timer is on the service thread's active list.
        const ACTIVE = 1 << 0;
        /// Timer is running (counting toward expiry).
        const RUNNING = 1 << 1;
        /// Command: start with the loaded `remaining` delay.
        const CTL_START = 1 << 7;
        /// Command: stop, saving the time left into `remaining`.
        const CTL_STOP = 1 << 8;
        /// Command: drop from the active list.
        const CTL_REMOVE = 1 << 9;
    }
}

const STATUS_BITS: u32 = 0xff;

/// A timer callback, run on the service thread.
pub type TimerFn = fn(usize);

/// Timer control block. Statically allocated by the application:
///
/// ```
/// use ritex::Timer;
/// fn blink(_arg: usize) {}
/// static BLINK: Timer = Timer::new(blink, 0, 500, "blink");
/// ```
pub struct Timer {
    callback: TimerFn,
    arg: usize,
    name: &'static str,
    control: AtomicU32,
    interval: AtomicU32,
    remaining: AtomicU32,
    expiry: AtomicU32,
    link: StackLink<Timer>,
}

impl Linked for Timer {
    fn link(&self) -> &StackLink<Timer> {
        &self.link
    }
}

impl Timer {
    /// A timer firing `callback(arg)` every `interval_ms` milliseconds;
    /// `interval_ms` of 0 makes it a one-shot.
    pub const fn new(callback: TimerFn, arg: usize, interval_ms: u32, name: &'static str) -> Self {
        Self {
            callback,
            arg,
            name,
            control: AtomicU32::new(0),
            interval: AtomicU32::new(interval_ms),
            remaining: AtomicU32::new(0),
            expiry: AtomicU32::new(0),
            link: StackLink::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn set_bits(&self, flags: TimerFlags) {
        self.control.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    fn clr_bits(&self, flags: TimerFlags) {
        self.control.fetch_and(!flags.bits(), Ordering::SeqCst);
    }

    fn has_bits(&self, flags: TimerFlags) -> bool {
        self.control.load(Ordering::SeqCst) & flags.bits() != 0
    }
}

/// Service-side state, embedded in the kernel.
pub(crate) struct TimerService {
    pub(crate) priority: AtomicU32,
    sig: SyncObject,
    add_list: MpscStack<Timer>,
    /// Head of the active list. Touched only by the service thread.
    active_head: AtomicPtr<Timer>,
    /// Pend timeout for the next service sleep (a delay in ms).
    next_wake: AtomicU32,
    status: StatusCell,
    value: ValueCell,
}

impl TimerService {
    pub(crate) const fn new() -> Self {
        Self {
            priority: AtomicU32::new(0),
            sig: SyncObject::signal(),
            add_list: MpscStack::new(),
            active_head: AtomicPtr::new(ptr::null_mut()),
            next_wake: AtomicU32::new(WAIT_MAX),
            status: StatusCell::new(),
            value: ValueCell::new(),
        }
    }
}

/// The service thread: sleep on the signal (or until the next expiry),
/// wake, apply commands, fire what is due, go back to sleep.
fn timer_service_thread(kernel: &'static Kernel, _arg: usize) {
    let mut at = kernel.thread_entry();
    loop {
        match at {
            0 => {
                let timeout = kernel.timer.next_wake.load(Ordering::SeqCst);
                if kernel
                    .pend_signal(
                        1,
                        Some(&kernel.timer.status),
                        Some(&kernel.timer.value),
                        timeout,
                        0xffff_ffff,
                        &kernel.timer.sig,
                    )
                    .must_yield()
                {
                    return;
                }
                at = 1;
            }
            1 => {
                kernel.timer_service_run();
                at = 0;
            }
            _ => unreachable!(),
        }
    }
}

impl Kernel {
    /// Create the timer service thread at the given priority. Timers do
    /// not fire until this has been called.
    pub fn enable_timer_service(&'static self, priority: u32) -> Status {
        let status = self.thread_create(timer_service_thread, 0, priority, Some("timer service"));
        if status == Status::Ok {
            self.timer.priority.store(priority, Ordering::SeqCst);
            log::info!("timer service enabled at priority {}", priority);
        }
        status
    }

    /// Hand a timer to the service thread for management. The timer starts
    /// out stopped. Like every operation here, the returned [`Control`]
    /// must be honored: waking the service thread can preempt the caller.
    pub fn timer_add(&'static self, resume: u32, timer: &'static Timer) -> Control {
        timer.control.store(0, Ordering::SeqCst);
        timer.remaining.store(0, Ordering::SeqCst);
        timer.expiry.store(0, Ordering::SeqCst);
        self.timer.add_list.push(timer);
        self.signal_timer_service(resume)
    }

    /// Drop a timer from the active list. The control block is free for
    /// reuse once its ACTIVE bit clears.
    pub fn timer_remove(&'static self, resume: u32, timer: &'static Timer) -> Control {
        timer.set_bits(TimerFlags::CTL_REMOVE);
        self.signal_timer_service(resume)
    }

    /// Start (or restart) a timer: first firing after `delay_ms`, then
    /// every `interval`. Restarting a running timer reloads it with the
    /// new delay, the watchdog idiom.
    pub fn timer_start(&'static self, resume: u32, timer: &'static Timer, delay_ms: u32) -> Control {
        timer.remaining.store(delay_ms, Ordering::SeqCst);
        timer.set_bits(TimerFlags::CTL_START);
        self.signal_timer_service(resume)
    }

    /// Stop a timer, saving its time-to-expiry for [`Kernel::timer_resume`].
    pub fn timer_stop(&'static self, resume: u32, timer: &'static Timer) -> Control {
        timer.set_bits(TimerFlags::CTL_STOP);
        self.signal_timer_service(resume)
    }

    /// Restart a stopped timer with the delay it had left.
    pub fn timer_resume(&'static self, resume: u32, timer: &'static Timer) -> Control {
        timer.set_bits(TimerFlags::CTL_START);
        self.signal_timer_service(resume)
    }

    /// Status bits (ACTIVE / RUNNING); command bits are masked out.
    pub fn timer_status(&self, timer: &Timer) -> TimerFlags {
        TimerFlags::from_bits_truncate(timer.control.load(Ordering::SeqCst) & STATUS_BITS)
    }

    /// Priority of the timer service thread, 0 while disabled.
    pub fn timer_service_priority(&self) -> u32 {
        self.timer.priority.load(Ordering::SeqCst)
    }

    /// Posts never fail; the signal value itself has no meaning.
    fn signal_timer_service(&'static self, resume: u32) -> Control {
        self.post_signal(resume, None, 1, &self.timer.sig)
    }

    /// One pass of the service thread's work.
    fn timer_service_run(&self) {
        let service = &self.timer;

        // splice newly added timers into the active list
        for timer in service.add_list.drain() {
            if timer.interval.load(Ordering::SeqCst) > WAIT_MAX {
                timer.interval.store(WAIT_MAX, Ordering::SeqCst);
            }
            if timer.remaining.load(Ordering::SeqCst) > WAIT_MAX {
                timer.remaining.store(WAIT_MAX, Ordering::SeqCst);
            }
            timer
                .link
                .store(service.active_head.load(Ordering::SeqCst));
            service
                .active_head
                .store(timer as *const Timer as *mut Timer, Ordering::SeqCst);
            timer.set_bits(TimerFlags::ACTIVE);
            log::debug!("timer '{}' added", timer.name);
        }

        let now = self.time_ms();
        let mut next_wake: Option<u32> = None;

        // the list is private to this thread from here on
        let mut prev: *mut Timer = ptr::null_mut();
        let mut cur = service.active_head.load(Ordering::SeqCst);
        while !cur.is_null() {
            // only &'static Timers are ever linked in
            let timer = unsafe { &*cur };
            let next = timer.link.load();

            if timer.has_bits(TimerFlags::CTL_REMOVE) {
                if prev.is_null() {
                    service.active_head.store(next, Ordering::SeqCst);
                } else {
                    unsafe { &*prev }.link.store(next);
                }
                // the block may cease to exist once the bits clear
                timer.control.store(0, Ordering::SeqCst);
                log::debug!("timer '{}' removed", timer.name);
                cur = next;
                continue;
            }

            if timer.has_bits(TimerFlags::CTL_START) {
                let delay = timer.remaining.load(Ordering::SeqCst);
                timer.expiry.store(now.wrapping_add(delay), Ordering::SeqCst);
                timer.set_bits(TimerFlags::RUNNING);
                timer.clr_bits(TimerFlags::CTL_START);
            }

            if timer.has_bits(TimerFlags::CTL_STOP) {
                let left = time_diff(timer.expiry.load(Ordering::SeqCst), now).max(0);
                timer.remaining.store(left as u32, Ordering::SeqCst);
                timer.expiry.store(0, Ordering::SeqCst);
                timer.clr_bits(TimerFlags::RUNNING | TimerFlags::CTL_STOP);
            }

            if timer.has_bits(TimerFlags::RUNNING) {
                let to_expiry = time_diff(timer.expiry.load(Ordering::SeqCst), now);
                if to_expiry <= 0 {
                    (timer.callback)(timer.arg);
                    let interval = timer.interval.load(Ordering::SeqCst);
                    if interval != 0 {
                        // re-arm from the previous expiry so the long-term
                        // period holds; a slip of a full interval or more
                        // resets the phase instead of firing a backlog
                        let late = (-to_expiry) as u32;
                        let base = if late >= interval {
                            now
                        } else {
                            timer.expiry.load(Ordering::SeqCst)
                        };
                        timer
                            .expiry
                            .store(base.wrapping_add(interval), Ordering::SeqCst);
                    } else {
                        timer.expiry.store(0, Ordering::SeqCst);
                        timer.clr_bits(TimerFlags::RUNNING);
                    }
                }
            }

            if timer.has_bits(TimerFlags::RUNNING) {
                let left = time_diff(timer.expiry.load(Ordering::SeqCst), now).max(0) as u32;
                next_wake = Some(match next_wake {
                    Some(w) => w.min(left),
                    None => left,
                });
            }

            prev = cur;
            cur = next;
        }

        service
            .next_wake
            .store(next_wake.unwrap_or(WAIT_MAX), Ordering::SeqCst);
    }
}
