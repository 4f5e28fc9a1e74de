/*
 * Scheduler
 *
 * Runs in two situations: cooperatively, when the running thread blocked on
 * a pend/post (the trampoline calls it before dispatching the next thread),
 * and asynchronously, when an interrupt pended it. It always runs to
 * completion and is never re-entered, which is what lets it walk and try
 * the waiting threads' events without any locking; the platform guarantees
 * that serialization.
 *
 * ## Selection
 *
 * The departing thread is filed first: onto `interrupted` when the
 * scheduler was entered from an interrupt, onto `waiting` when its event is
 * still in flight, onto `ready` when its operation completed but freed a
 * higher-priority thread.
 *
 * Then the highest-priority thread across ready | interrupted | waiting
 * (under a working mask) is considered:
 *
 * - ready: dispatch it from its resume marker (or entry).
 * - interrupted: its context is on the stack; resume it there.
 * - waiting: retry its event. If that succeeds the thread is dispatched
 *   (and if the retry *also* freed an even higher-priority thread, the
 *   scheduler pends itself to run again right after). If not, the thread is
 *   masked out and the search continues.
 *
 * ## Priority inversion
 *
 * A thread blocked on a mutex means the mutex is held by a lower-priority
 * thread (it would be poor form to take a mutex and then block). If that
 * owner is itself waiting, it is tried next, ahead of its nominal turn
 * ("hoisting"). If the owner was interrupted, its state is buried in the
 * stack: waiting threads are masked out entirely so interrupted threads
 * unwind until the owner runs and releases the mutex.
 *
 * ## Idle
 *
 * With nothing runnable, the idle hook is called with the time until the
 * next thread timeout. Whatever sleep it reports is added to the kernel
 * clock, the mask is reset, and selection starts over.
 */

use core::sync::atomic::Ordering;

use crate::bitmap;
use crate::config::THREADS_MAX;
use crate::sync::ObjectKind;

use super::event::{time_diff, timeout_expired, Action};
use super::{Kernel, ThreadId, WAIT_FOREVER};

/// What the trampoline should do with the selected thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Call the thread function (from its resume marker, or its entry).
    Entry(ThreadId),
    /// The thread's context is on the interrupted stack; return into it.
    Stacked(ThreadId),
}

impl Kernel {
    /// One scheduler pass. Returns the thread to transfer control to.
    pub(crate) fn schedule(&self, from_interrupt: bool) -> Dispatch {
        self.sched_active.store(true, Ordering::SeqCst);

        let running = self.thread_id();

        // file the departing thread
        if from_interrupt {
            self.interrupted.set(running);
        } else if self.tcb(running).event.action() == Action::None {
            self.ready.set(running);
        } else {
            self.waiting.set(running);
        }

        let mut mask: u32 = 0;
        let mut hoisted: ThreadId = 0;

        let selected = loop {
            let candidate = if hoisted != 0 {
                let c = hoisted;
                hoisted = 0;
                c
            } else {
                bitmap::hpt(
                    self.ready.raw() | self.interrupted.raw() | self.waiting.raw(),
                    mask,
                )
            };

            if self.ready.contains(candidate) {
                self.ready.clr(candidate);
                break Dispatch::Entry(candidate);
            } else if self.interrupted.contains(candidate) {
                self.interrupted.clr(candidate);
                break Dispatch::Stacked(candidate);
            } else if self.waiting.contains(candidate) {
                let event = &self.tcb(candidate).event;
                let unblock = self.event_try(candidate, event);
                if unblock != 0 {
                    self.waiting.clr(candidate);
                    if unblock > candidate {
                        // freed something better: service it right after
                        // this dispatch
                        self.platform().pend_scheduler();
                    }
                    break Dispatch::Entry(candidate);
                }

                mask |= 1 << (candidate - 1);

                // candidate stays blocked; if it is blocked on a mutex the
                // owner has lower priority and gets helped along
                if let Some(object) = event.object() {
                    if object.kind() == ObjectKind::Mutex {
                        // count 0 <=> owned; owner can only read as 0 here
                        // if an interrupt released the mutex since the try,
                        // in which case the retry after the mask resets
                        // will succeed anyway
                        let owner = object.owner_id();
                        if owner != 0 && owner < candidate {
                            if self.waiting.contains(owner) {
                                mask |= 1 << (owner - 1);
                                hoisted = owner;
                            } else {
                                // owner is on the interrupted stack: stop
                                // considering waiters, unwind the stack
                                mask |= self.waiting.raw();
                            }
                        }
                    }
                }
            } else {
                // nothing runnable: idle until a timeout or an interrupt
                // changes the picture
                let slept = self.platform().idle_hook(self.timeout_next_ms());
                self.platform().advance_ms(slept);
                mask = 0;
            }
        };

        let tid = match selected {
            Dispatch::Entry(tid) | Dispatch::Stacked(tid) => tid,
        };
        self.set_running(tid);
        self.sched_active.store(false, Ordering::SeqCst);
        selected
    }

    /// Highest-priority waiting thread whose timeout has expired, or 0.
    ///
    /// All timeout processing happens on the scheduler's side of the fence;
    /// the tick handler only uses this to decide whether to pend it.
    pub fn thread_timeout(&self) -> ThreadId {
        let now = self.time_ms();
        let mut mask: u32 = 0;
        loop {
            let tid = bitmap::hpt(self.waiting.raw(), mask);
            if tid == 0 {
                return 0;
            }
            if timeout_expired(self.tcb(tid).event.timeout(), now) {
                return tid;
            }
            mask |= 1 << (tid - 1);
        }
    }

    /// Milliseconds until the soonest pending thread timeout: negative if
    /// one already expired, 0 if no thread has a timeout pending.
    pub fn timeout_next_ms(&self) -> i32 {
        let now = self.time_ms();
        let waiting = self.waiting.raw();
        let mut next: Option<i32> = None;
        for tid in 1..=THREADS_MAX {
            if waiting & (1 << (tid - 1)) == 0 {
                continue;
            }
            let timeout = self.tcb(tid).event.timeout();
            if timeout == 0 || timeout == WAIT_FOREVER {
                continue;
            }
            let diff = time_diff(timeout, now);
            next = Some(match next {
                Some(n) => n.min(diff),
                None => diff,
            });
        }
        next.unwrap_or(0)
    }

    /// Tick-handler glue: pend the scheduler when a waiting thread has
    /// timed out at a priority at least as urgent as the running thread.
    pub fn on_tick(&self) {
        if self.thread_timeout() > self.thread_id() {
            self.platform().pend_scheduler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HostedPlatform, Platform};
    use crate::sync::{Status, SyncObject};
    use crate::Control;

    fn fixture() -> (&'static Kernel, &'static HostedPlatform) {
        let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new()));
        let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(platform)));
        (kernel, platform)
    }

    fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    fn bit(tid: ThreadId) -> u32 {
        1 << (tid - 1)
    }

    fn noop(_kernel: &'static Kernel, _arg: usize) {}

    #[test]
    fn departure_filing() {
        let (kernel, _platform) = fixture();
        let running = THREADS_MAX - 2;
        let top = THREADS_MAX;
        assert_eq!(kernel.thread_create(noop, 0, top, None), Status::Ok);

        // entered from an interrupt: the running thread goes to interrupted
        kernel.set_running(running);
        assert_eq!(kernel.schedule(true), Dispatch::Entry(top));
        assert!(kernel.interrupted.raw() & bit(running) != 0);
        assert_eq!(kernel.thread_id(), top);

        // entered from a thread with an event in flight: goes to waiting
        kernel.interrupted.replace(0);
        kernel.ready.set(top);
        kernel.set_running(running);
        let sem = leak(SyncObject::semaphore(4, 4));
        let event = &kernel.tcb(running).event;
        kernel.event_init(event, running, 0, None, None, 5, 0, sem, super::Action::Post);
        assert_eq!(kernel.schedule(false), Dispatch::Entry(top));
        assert!(kernel.waiting.raw() & bit(running) != 0);

        // entered from a thread with no event: completed but preempted,
        // goes back to ready
        kernel.waiting.replace(0);
        kernel.tcb(running).event.clear();
        kernel.ready.set(top);
        kernel.set_running(running);
        assert_eq!(kernel.schedule(false), Dispatch::Entry(top));
        assert!(kernel.ready.raw() & bit(running) != 0);
    }

    #[test]
    fn interrupted_thread_resumes_from_stack() {
        let (kernel, _platform) = fixture();
        let top = THREADS_MAX;
        kernel.interrupted.set(top);
        kernel.set_running(0);
        assert_eq!(kernel.schedule(false), Dispatch::Stacked(top));
        assert_eq!(kernel.interrupted.raw(), 0);
        assert_eq!(kernel.thread_id(), top);
    }

    #[test]
    fn waiting_thread_with_satisfiable_event_is_dispatched() {
        let (kernel, platform) = fixture();
        let waiter = 10;
        let sem = leak(SyncObject::semaphore(4, 1)); // one token available
        platform.set_time(50);

        kernel.set_running(waiter);
        let control = kernel.pend(1, None, None, WAIT_FOREVER, sem);
        // token is there: completes without blocking
        assert_eq!(control, Control::Continue);

        // now block for real
        kernel.set_running(waiter);
        assert_eq!(kernel.pend(1, None, None, WAIT_FOREVER, sem), Control::Yield);

        // an interrupt hands a token back before the thread's yield reaches
        // the scheduler
        platform.enter_interrupt(14);
        let _ = kernel.post(0, None, 0, 0, sem);
        platform.exit_interrupt();

        // the scheduler files the yielding thread as waiting, retries its
        // event, and dispatches it straight away
        assert_eq!(kernel.schedule(false), Dispatch::Entry(waiter));
        assert_eq!(kernel.waiting.raw() & bit(waiter), 0);
        assert_eq!(sem.pend_waiters_raw(), 0);
    }

    #[test]
    fn thread_timeout_scan() {
        let (kernel, platform) = fixture();
        let tid = THREADS_MAX;
        kernel.set_running(tid);
        platform.set_time(10);

        assert_eq!(kernel.delay(0, 5), Control::Yield);
        kernel.waiting.set(tid); // what the scheduler would do on yield

        assert_eq!(kernel.thread_timeout(), 0);
        platform.set_time(14);
        assert_eq!(kernel.thread_timeout(), 0);
        platform.set_time(15);
        assert_eq!(kernel.thread_timeout(), tid);
    }

    #[test]
    fn timeout_next_ms_tracks_soonest() {
        let (kernel, platform) = fixture();
        platform.set_time(100);

        // nobody waiting: no timeouts pending
        assert_eq!(kernel.timeout_next_ms(), 0);

        kernel.set_running(4);
        assert_eq!(kernel.delay(0, 50), Control::Yield);
        kernel.waiting.set(4);

        kernel.set_running(9);
        assert_eq!(kernel.delay(0, 20), Control::Yield);
        kernel.waiting.set(9);

        // forever-waiters do not contribute
        let sem = leak(SyncObject::semaphore(1, 0));
        kernel.set_running(12);
        assert_eq!(kernel.pend(0, None, None, WAIT_FOREVER, sem), Control::Yield);
        kernel.waiting.set(12);

        assert_eq!(kernel.timeout_next_ms(), 20);
        platform.set_time(130);
        assert_eq!(kernel.timeout_next_ms(), -10); // already expired
    }

    #[test]
    fn on_tick_pends_for_urgent_timeouts_only(){
        let (kernel, platform) = fixture();
        platform.set_time(0);

        kernel.set_running(5);
        assert_eq!(kernel.delay(0, 3), Control::Yield);
        kernel.waiting.set(5);

        // a lower-priority thread timing out does not preempt
        kernel.set_running(20);
        platform.set_time(10);
        kernel.on_tick();
        assert!(!platform.scheduler_pended());

        // a higher-priority one does
        kernel.set_running(2);
        kernel.on_tick();
        assert!(platform.scheduler_pended());
        assert!(platform.take_scheduler_pend());
    }

    #[test]
    fn idle_hook_advances_clock_and_reschedules() {
        let (kernel, platform) = fixture();

        // nothing runnable except a delayed thread; the idle hook reports
        // sleep, the clock advances, the timeout satisfies, dispatch
        fn hook(sleep_for_ms: i32) -> u32 {
            assert!(sleep_for_ms > 0);
            sleep_for_ms as u32
        }
        platform.set_idle_hook(hook);

        let sleeper = 7;
        kernel.set_running(sleeper);
        platform.set_time(0);
        assert_eq!(kernel.delay(0, 25), Control::Yield);

        kernel.set_running(sleeper);
        let selected = kernel.schedule(false);
        assert_eq!(selected, Dispatch::Entry(sleeper));
        assert!(kernel.time_ms() >= 25);
    }
}
