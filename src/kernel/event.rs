/*
 * Event Engine
 *
 * An event is a pend or post in flight: the target object plus every
 * control and data field needed to run the attempt stand-alone from a
 * thread, from an interrupt handler, or by the scheduler on a waiting
 * thread's behalf. Thread events are embedded in the thread control block;
 * interrupt events are temporaries on the handler's stack, since a handler
 * can neither block nor be preempted by a thread.
 *
 * Every pend/post in the system funnels through `pend_post` -> `event_try`.
 * `event_try` returns a thread ID with this contract:
 *
 *   0                    the operation must block; a thread caller yields
 *   == caller's thread   completed (or failed non-blocking); carry on
 *   >  caller's thread   completed AND freed a higher-priority thread;
 *                        the scheduler must be pended / re-run
 *
 * Trying a waiting thread's event from the scheduler is safe because the
 * scheduler only tries events of threads parked on the waiting list.
 */

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::bitmap;
use crate::cpu;
use crate::sync::{Body, ObjectKind, Status, StatusCell, SyncObject, ValueCell};
use crate::tagged;

use super::{Control, Kernel, ThreadId, WAIT_FOREVER, WAIT_MAX};

/// What an event is doing to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum Action {
    None = 0,
    Pend = 1,
    Post = 2,
}

impl Action {
    fn from_raw(raw: u32) -> Action {
        match raw {
            1 => Action::Pend,
            2 => Action::Post,
            _ => Action::None,
        }
    }
}

/// A pend/post attempt. All fields are atomics so the record can be read
/// by the scheduler and the timer tick while the owning context still runs.
pub(crate) struct Event {
    /// Absolute expiry in kernel ms. 0 = non-blocking, WAIT_FOREVER = no
    /// expiry; anything else is a clock time.
    timeout: AtomicU32,
    status: AtomicPtr<StatusCell>,
    value: AtomicPtr<ValueCell>,
    /// Post value, or signal mask for signal pends.
    input: AtomicU32,
    action: AtomicU32,
    object: AtomicPtr<SyncObject>,
}

impl Event {
    pub(crate) const fn new() -> Self {
        Self {
            timeout: AtomicU32::new(0),
            status: AtomicPtr::new(ptr::null_mut()),
            value: AtomicPtr::new(ptr::null_mut()),
            input: AtomicU32::new(0),
            action: AtomicU32::new(Action::None as u32),
            object: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn action(&self) -> Action {
        Action::from_raw(self.action.load(Ordering::SeqCst))
    }

    pub(crate) fn timeout(&self) -> u32 {
        self.timeout.load(Ordering::SeqCst)
    }

    pub(crate) fn input(&self) -> u32 {
        self.input.load(Ordering::SeqCst)
    }

    /// The target object. Only `&'static` references are ever stored, so
    /// the returned borrow is valid.
    pub(crate) fn object(&self) -> Option<&'static SyncObject> {
        let p = self.object.load(Ordering::SeqCst);
        if p.is_null() {
            None
        } else {
            Some(unsafe { &*p })
        }
    }

    fn status_cell(&self) -> Option<&'static StatusCell> {
        let p = self.status.load(Ordering::SeqCst);
        if p.is_null() {
            None
        } else {
            Some(unsafe { &*p })
        }
    }

    fn value_cell(&self) -> Option<&'static ValueCell> {
        let p = self.value.load(Ordering::SeqCst);
        if p.is_null() {
            None
        } else {
            Some(unsafe { &*p })
        }
    }

    pub(crate) fn clear(&self) {
        self.timeout.store(0, Ordering::SeqCst);
        self.status.store(ptr::null_mut(), Ordering::SeqCst);
        self.value.store(ptr::null_mut(), Ordering::SeqCst);
        self.input.store(0, Ordering::SeqCst);
        self.action.store(Action::None as u32, Ordering::SeqCst);
        self.object.store(ptr::null_mut(), Ordering::SeqCst);
    }
}

/// Signed difference between two kernel times. Correct across rollover as
/// long as the true difference is under 2^31 ms.
#[inline]
pub fn time_diff(time: u32, reference: u32) -> i32 {
    time.wrapping_sub(reference) as i32
}

/// Has an absolute event timeout passed? The two reserved encodings never
/// expire.
#[inline]
pub(crate) fn timeout_expired(timeout: u32, now: u32) -> bool {
    timeout != 0 && timeout != WAIT_FOREVER && time_diff(timeout, now) <= 0
}

impl Kernel {
    /// The single entry point behind every pend/post-class API call.
    ///
    /// Validates the blocking rules, initializes the proper event record
    /// (embedded for a thread, stack temporary for an interrupt), tries it,
    /// and translates the unblock contract into a [`Control`] for the
    /// caller.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn pend_post(
        &'static self,
        resume: u32,
        status: Option<&'static StatusCell>,
        value: Option<&'static ValueCell>,
        timeout: u32,
        input: u32,
        object: &'static SyncObject,
        action: Action,
    ) -> Control {
        let running = self.thread_id();
        let in_interrupt = self.platform().in_interrupt() != 0;

        // interrupt handlers and the idle thread cannot block
        if timeout != 0 && (in_interrupt || running == 0) {
            if let Some(cell) = status {
                cell.set(Status::BlockErr);
            }
            return Control::Continue;
        }

        let interrupt_event;
        let (event, event_tid): (&Event, ThreadId) = if in_interrupt {
            interrupt_event = Event::new();
            (&interrupt_event, 0)
        } else {
            (&self.tcb(running).event, running)
        };

        self.event_init(event, event_tid, resume, status, value, timeout, input, object, action);
        let unblock = self.event_try(running, event);

        if in_interrupt {
            if unblock > running {
                self.platform().pend_scheduler();
            }
            return Control::Continue;
        }

        if unblock == 0 || unblock > running {
            // blocked, or completed but freed a higher-priority thread:
            // either way the thread must return to the trampoline
            return Control::Yield;
        }

        // completed in place: the recorded continuation is not needed
        self.tcb(running).set_resume(0);
        Control::Continue
    }

    /// Fill in an event record and prospectively register the thread on the
    /// object's waiter set (a no-op for interrupt events, which carry
    /// thread ID 0).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn event_init(
        &self,
        event: &Event,
        tid: ThreadId,
        resume: u32,
        status: Option<&'static StatusCell>,
        value: Option<&'static ValueCell>,
        timeout: u32,
        input: u32,
        object: &'static SyncObject,
        action: Action,
    ) {
        self.tcb(tid).set_resume(resume);

        event.object.store(
            object as *const SyncObject as *mut SyncObject,
            Ordering::SeqCst,
        );
        event.action.store(action as u32, Ordering::SeqCst);
        event.status.store(
            status.map_or(ptr::null_mut(), |c| c as *const StatusCell as *mut StatusCell),
            Ordering::SeqCst,
        );
        if let Some(cell) = status {
            cell.set(Status::Invalid);
        }
        event.value.store(
            value.map_or(ptr::null_mut(), |c| c as *const ValueCell as *mut ValueCell),
            Ordering::SeqCst,
        );
        event.input.store(input, Ordering::SeqCst);

        // won't be acted on unless the thread actually ends up waiting
        match action {
            Action::Pend => object.pend_waiters.set(tid),
            Action::Post => object.post_waiters.set(tid),
            Action::None => {}
        }

        // Timeout normalization: the reserved encodings are stored as-is,
        // anything else is clamped and converted to an absolute clock time
        // that must not land on the reserved value 0.
        if timeout == 0 || timeout == WAIT_FOREVER {
            event.timeout.store(timeout, Ordering::SeqCst);
        } else {
            let delay = timeout.min(WAIT_MAX);
            let mut expiry = self.time_ms().wrapping_add(delay);
            if expiry == 0 {
                expiry = 1;
            }
            event.timeout.store(expiry, Ordering::SeqCst);
        }
    }

    /// Tear an event down after completion or timeout: drop the waiter
    /// bits, deliver the status, clear the record.
    pub(crate) fn event_remove(&self, tid: ThreadId, event: &Event, status: Status) {
        debug_assert!(event.object().is_some());

        // Interrupt events never made it onto a waiter set (thread ID 0),
        // so only thread-context and scheduler-context removals clean up.
        // The scheduler runs in handler mode but is trying thread events by
        // proxy, so it does not count as an interrupt here.
        if self.platform().in_interrupt() == 0 || self.in_scheduler() {
            if let Some(object) = event.object() {
                object.pend_waiters.clr(tid);
                object.post_waiters.clr(tid);
            }
        }

        if let Some(cell) = event.status_cell() {
            cell.set(status);
        }
        event.clear();
    }

    /// Try an event against its object.
    ///
    /// `tid` is the thread the event belongs to: the running thread when
    /// called from a thread or an interrupt, the waiting thread when the
    /// scheduler retries on its behalf. Returns the unblock thread ID
    /// (see the module header for the contract).
    pub(crate) fn event_try(&self, tid: ThreadId, event: &Event) -> ThreadId {
        debug_assert!(tid <= crate::config::THREADS_MAX);
        let Some(object) = event.object() else {
            debug_assert!(false, "event without object");
            return tid;
        };
        let action = event.action();
        debug_assert!(action == Action::Pend || action == Action::Post);

        if timeout_expired(event.timeout(), self.time_ms()) {
            self.event_remove(tid, event, Status::ThreadTimeout);
            return tid;
        }

        match object.kind() {
            ObjectKind::Semaphore | ObjectKind::Mutex => {
                let acquired = self.sema_mutex_try(event);
                if action == Action::Pend {
                    if acquired {
                        if object.kind() == ObjectKind::Mutex {
                            object.set_owner(tid);
                        }
                        // posts never block, so nobody waits on that side
                        debug_assert!(object.post_waiters.is_empty());
                        self.event_remove(tid, event, Status::Ok);
                        tid
                    } else if event.timeout() == 0 {
                        self.event_remove(tid, event, Status::EventNotReady);
                        tid
                    } else {
                        0
                    }
                } else {
                    // increments always succeed (saturation is silent)
                    debug_assert!(acquired);
                    if object.kind() == ObjectKind::Mutex {
                        debug_assert!(object.owner_id() == tid); // unlock by non-owner
                        object.set_owner(0);
                    }
                    self.event_remove(tid, event, Status::Ok);
                    let hpt = bitmap::hpt(object.pend_waiters.raw(), 0);
                    if hpt > tid {
                        hpt
                    } else {
                        tid
                    }
                }
            }

            ObjectKind::Signal => {
                let matched = self.signal_try(event);
                if action == Action::Pend {
                    if matched {
                        debug_assert!(object.post_waiters.is_empty());
                        self.event_remove(tid, event, Status::Ok);
                        tid
                    } else if event.timeout() == 0 {
                        self.event_remove(tid, event, Status::SignalNone);
                        tid
                    } else {
                        0
                    }
                } else {
                    // setting bits cannot fail
                    debug_assert!(matched);
                    self.event_remove(tid, event, Status::Ok);
                    // wake the best waiter whose mask overlaps what is now
                    // latched
                    let hpt = self.signal_waiter_hpt(object);
                    if hpt > tid {
                        hpt
                    } else {
                        tid
                    }
                }
            }

            // a delay never completes by itself; expiry above is the only
            // way out
            ObjectKind::Delay => 0,
        }
    }

    /// Highest-priority signal waiter whose mask intersects the currently
    /// latched bits.
    fn signal_waiter_hpt(&self, object: &SyncObject) -> ThreadId {
        let latched = object.signal_bits();
        let mut mask = 0u32;
        loop {
            let tid = bitmap::hpt(object.pend_waiters.raw(), mask);
            if tid == 0 {
                return 0;
            }
            if self.tcb(tid).event.input() & latched != 0 {
                return tid;
            }
            mask |= 1 << (tid - 1);
        }
    }

    /// Attempt the semaphore/mutex count change. Returns true on success,
    /// false when a pend found the count at zero. The caller's value cell
    /// tracks the count it observed (final count on success).
    fn sema_mutex_try(&self, event: &Event) -> bool {
        let Some(object) = event.object() else {
            debug_assert!(false, "event without object");
            return false;
        };
        let Body::Counted { count, max_count, .. } = &object.body else {
            debug_assert!(false, "counted try on non-counted object");
            return false;
        };
        let action = event.action();
        debug_assert!(action == Action::Pend || action == Action::Post);
        let pending = action == Action::Pend;
        let value = event.value_cell();

        let mut observed;
        loop {
            let old = count.load(Ordering::SeqCst);
            observed = tagged::data(old);
            if let Some(cell) = value {
                cell.set(observed as u32);
            }
            if pending && observed == 0 {
                return false; // not available
            }
            if !pending && observed == *max_count {
                break; // saturated: silent success, count unchanged
            }
            let new_count = if pending { observed - 1 } else { observed + 1 };
            let new = self.tags().tagged(new_count);
            if let Some(cell) = value {
                cell.set(new_count as u32);
            }
            if !cpu::cas(count, old, new) {
                break;
            }
        }

        debug_assert!(object.count() <= *max_count);
        // posting a mutex that is already free is a lock/unlock mismatch
        debug_assert!(!(object.kind() == ObjectKind::Mutex && !pending && observed == 1));

        true
    }

    /// Attempt the signal read-and-clear (pend) or OR-in (post). For a
    /// pend, the matched bits land in the value cell and are cleared from
    /// the signal word; returns whether any bit matched. Posts always
    /// succeed.
    fn signal_try(&self, event: &Event) -> bool {
        let Some(object) = event.object() else {
            debug_assert!(false, "event without object");
            return false;
        };
        let Body::Signal { bits } = &object.body else {
            debug_assert!(false, "signal try on non-signal object");
            return false;
        };
        let action = event.action();
        debug_assert!(action == Action::Pend || action == Action::Post);
        let pending = action == Action::Pend;

        let mut matched;
        loop {
            let signal = bits.load(Ordering::SeqCst);
            matched = signal & event.input();
            let new_signal = if pending {
                signal & !matched
            } else {
                signal | event.input()
            };
            if !cpu::cas(bits, signal, new_signal) {
                break;
            }
        }

        if pending {
            if let Some(cell) = event.value_cell() {
                cell.set(matched);
            }
            matched != 0
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::THREADS_MAX;
    use crate::platform::HostedPlatform;

    fn fixture() -> (&'static Kernel, &'static HostedPlatform) {
        let platform: &'static HostedPlatform = Box::leak(Box::new(HostedPlatform::new()));
        let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(platform)));
        (kernel, platform)
    }

    fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    #[test]
    fn time_diff_rollover() {
        assert_eq!(time_diff(0, 0), 0);
        assert_eq!(time_diff(1, 0), 1);
        assert_eq!(time_diff(0, 1), -1);

        assert_eq!(time_diff(0xffff, 1), 0xfffe);
        assert_eq!(time_diff(0x10000, 1), 0xffff);
        assert_eq!(time_diff(0x7fff_ffff, 1), 2147483646);
        assert_eq!(time_diff(0x8000_0000, 1), 2147483647);
        assert_eq!(time_diff(0x8000_0001, 1), i32::MIN); // sign flip at 2^31
        assert_eq!(time_diff(0x8000_0002, 1), -2147483647);

        assert_eq!(time_diff(1, 0xffff), -0xfffe);
        assert_eq!(time_diff(1, 0x7fff_ffff), -2147483646);
        assert_eq!(time_diff(1, 0x8000_0000), -2147483647);
        assert_eq!(time_diff(1, 0x8000_0001), i32::MIN);
        assert_eq!(time_diff(1, 0x8000_0002), 2147483647); // sign flip at 2^31
    }

    #[test]
    fn event_init_and_remove_thread_mode() {
        let (kernel, platform) = fixture();
        let sem = leak(SyncObject::semaphore(10, 10));
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());
        let tid = THREADS_MAX;

        kernel.set_running(tid);
        platform.set_time(10);

        let event = &kernel.tcb(tid).event;
        kernel.event_init(event, tid, 7, Some(status), Some(value), 5, 1, sem, Action::Pend);

        assert_eq!(kernel.tcb(tid).resume_marker(), 7);
        assert_eq!(event.timeout(), 10 + 5); // absolute expiry
        assert_eq!(event.input(), 1);
        assert_eq!(event.action(), Action::Pend);
        assert!(core::ptr::eq(event.object().unwrap(), sem));
        assert!(sem.pend_waiters.contains(tid));
        assert_eq!(status.get(), Status::Invalid);

        kernel.event_remove(tid, event, Status::EventNotReady);
        assert_eq!(sem.pend_waiters_raw(), 0);
        assert!(event.object().is_none());
        assert_eq!(event.action(), Action::None);
        assert_eq!(event.timeout(), 0);
        assert_eq!(status.get(), Status::EventNotReady);
    }

    #[test]
    fn event_init_and_remove_interrupt_mode() {
        let (kernel, platform) = fixture();
        let sem = leak(SyncObject::semaphore(10, 10));
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());

        platform.enter_interrupt(14);
        platform.set_time(100);

        // interrupt events are temporaries carrying thread ID 0
        let event = Event::new();
        kernel.event_init(&event, 0, 0, Some(status), Some(value), 0, 2, sem, Action::Post);
        assert_eq!(event.timeout(), 0);
        assert_eq!(event.input(), 2);
        assert_eq!(event.action(), Action::Post);
        assert_eq!(sem.post_waiters_raw(), 0); // tid 0 leaves no waiter bit
        assert_eq!(status.get(), Status::Invalid);

        kernel.event_remove(0, &event, Status::BlockErr);
        assert!(event.object().is_none());
        assert_eq!(event.action(), Action::None);
        assert_eq!(status.get(), Status::BlockErr);
    }

    #[test]
    fn timeout_normalization_avoids_reserved_values() {
        let (kernel, platform) = fixture();
        let sem = leak(SyncObject::semaphore(1, 0));
        let tid = 5;
        kernel.set_running(tid);
        let event = &kernel.tcb(tid).event;

        // forever is stored untouched
        kernel.event_init(event, tid, 0, None, None, WAIT_FOREVER, 0, sem, Action::Pend);
        assert_eq!(event.timeout(), WAIT_FOREVER);

        // over-long delays clamp to WAIT_MAX
        platform.set_time(0);
        kernel.event_init(event, tid, 0, None, None, WAIT_FOREVER - 1, 0, sem, Action::Pend);
        assert_eq!(event.timeout(), WAIT_MAX);

        // an expiry that would land on the reserved 0 is bumped to 1
        platform.set_time(0u32.wrapping_sub(5));
        kernel.event_init(event, tid, 0, None, None, 5, 0, sem, Action::Pend);
        assert_eq!(event.timeout(), 1);
    }

    #[test]
    fn semaphore_try_count_progression() {
        let (kernel, _platform) = fixture();
        let sem = leak(SyncObject::semaphore(10, 10));
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());
        let tid = THREADS_MAX;
        kernel.set_running(tid);
        let event = &kernel.tcb(tid).event;

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Pend);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 9);

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Post);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 10);

        // saturated: post succeeds silently, count pinned at max
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Post);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(sem.count(), 10);

        // drain to zero
        for expect in (0..10).rev() {
            kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Pend);
            assert!(kernel.sema_mutex_try(event));
            assert_eq!(value.get(), expect);
        }

        // empty: pend fails, count observed as 0
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Pend);
        assert!(!kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 0);

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sem, Action::Post);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 1);
    }

    #[test]
    fn mutex_try_acquire_release() {
        let (kernel, _platform) = fixture();
        let mutex = leak(SyncObject::mutex());
        let value = leak(ValueCell::new());
        let tid = THREADS_MAX;
        kernel.set_running(tid);
        let event = &kernel.tcb(tid).event;

        assert_eq!(mutex.owner_id(), 0);

        kernel.event_init(event, tid, 0, None, Some(value), 5, 0, mutex, Action::Pend);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 0); // taken

        kernel.event_init(event, tid, 0, None, Some(value), 5, 0, mutex, Action::Post);
        assert!(kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 1); // released

        kernel.event_init(event, tid, 0, None, Some(value), 5, 0, mutex, Action::Pend);
        assert!(kernel.sema_mutex_try(event));

        // second take fails without blocking machinery at this layer
        kernel.event_init(event, tid, 0, None, Some(value), 5, 0, mutex, Action::Pend);
        assert!(!kernel.sema_mutex_try(event));
        assert_eq!(value.get(), 0);
    }

    #[test]
    #[should_panic]
    fn mutex_double_release_asserts() {
        let (kernel, _platform) = fixture();
        let mutex = leak(SyncObject::mutex());
        let tid = THREADS_MAX;
        kernel.set_running(tid);
        let event = &kernel.tcb(tid).event;

        // mutex is free (count 1): releasing again is a lock/unlock mismatch
        kernel.event_init(event, tid, 0, None, None, 5, 0, mutex, Action::Post);
        let _ = kernel.sema_mutex_try(event);
    }

    #[test]
    fn signal_try_match_and_clear() {
        let (kernel, _platform) = fixture();
        let sig = leak(SyncObject::signal());
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());
        let tid = THREADS_MAX;
        kernel.set_running(tid);
        let event = &kernel.tcb(tid).event;

        // empty signal, full mask: nothing matches
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0xffff_ffff, sig, Action::Pend);
        assert!(!kernel.signal_try(event));
        assert_eq!(value.get(), 0);

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 1, sig, Action::Post);
        assert!(kernel.signal_try(event)); // signal now 0x0000_0001
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0x1010_1010, sig, Action::Post);
        assert!(kernel.signal_try(event)); // signal now 0x1010_1011

        // empty mask matches nothing
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0, sig, Action::Pend);
        assert!(!kernel.signal_try(event));
        assert_eq!(value.get(), 0);

        // single-bit mask takes just that bit
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0x0000_0010, sig, Action::Pend);
        assert!(kernel.signal_try(event));
        assert_eq!(value.get(), 0x0000_0010);
        assert_eq!(sig.signal_bits(), 0x1010_1001);

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0x0101_0101, sig, Action::Pend);
        assert!(kernel.signal_try(event));
        assert_eq!(value.get(), 1);
        assert_eq!(sig.signal_bits(), 0x1010_1000);

        // full mask drains the rest
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0xffff_ffff, sig, Action::Pend);
        assert!(kernel.signal_try(event));
        assert_eq!(value.get(), 0x1010_1000);
        assert_eq!(sig.signal_bits(), 0);

        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 0xffff_ffff, sig, Action::Pend);
        assert!(!kernel.signal_try(event));
        assert_eq!(value.get(), 0);
    }

    #[test]
    fn event_try_contract() {
        let (kernel, platform) = fixture();
        let sem = leak(SyncObject::semaphore(10, 0));
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());
        let tid = THREADS_MAX;

        // thread mode, empty semaphore, blocking pend: must block
        kernel.set_running(tid);
        platform.set_time(10);
        let event = &kernel.tcb(tid).event;
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 1, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, event), 0);
        // blocked: no status until it completes
        assert_eq!(status.get(), Status::Invalid);

        // post completes and reports the poster itself
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 1, sem, Action::Post);
        assert_eq!(kernel.event_try(tid, event), tid);
        assert_eq!(status.get(), Status::Ok);
        assert_eq!(value.get(), 1);

        // pend now succeeds
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 1, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, event), tid);
        assert_eq!(status.get(), Status::Ok);
        assert_eq!(value.get(), 0);

        // interrupt mode: non-blocking failure completes with EventNotReady
        platform.enter_interrupt(14);
        platform.set_time(100);
        let int_event = Event::new();
        kernel.event_init(&int_event, 0, 0, Some(status), Some(value), 0, 1, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, &int_event), tid);
        assert_eq!(status.get(), Status::EventNotReady);

        kernel.event_init(&int_event, 0, 0, Some(status), Some(value), 0, 1, sem, Action::Post);
        assert_eq!(kernel.event_try(tid, &int_event), tid);
        assert_eq!(status.get(), Status::Ok);

        kernel.event_init(&int_event, 0, 0, Some(status), Some(value), 0, 1, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, &int_event), tid);
        assert_eq!(status.get(), Status::Ok);
        platform.exit_interrupt();

        // a post that frees a waiting higher-priority thread reports it
        kernel.set_running(tid);
        platform.set_time(1000);
        let event = &kernel.tcb(tid).event;
        kernel.event_init(event, tid, 0, Some(status), Some(value), 5, 1, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, event), 0); // blocks, leaves waiter bit

        kernel.set_running(tid - 1);
        let lower = &kernel.tcb(tid - 1).event;
        kernel.event_init(lower, tid - 1, 0, Some(status), Some(value), 5, 1, sem, Action::Post);
        assert_eq!(kernel.event_try(tid - 1, lower), tid); // higher waiter reported
    }

    #[test]
    fn event_try_timeout_expiry() {
        let (kernel, platform) = fixture();
        let sem = leak(SyncObject::semaphore(1, 0));
        let status = leak(StatusCell::new());
        let tid = 9;
        kernel.set_running(tid);
        platform.set_time(10);

        let event = &kernel.tcb(tid).event;
        kernel.event_init(event, tid, 0, Some(status), None, 5, 0, sem, Action::Pend);
        assert_eq!(kernel.event_try(tid, event), 0); // waiting
        assert!(sem.pend_waiters.contains(tid));

        platform.set_time(14);
        assert_eq!(kernel.event_try(tid, event), 0); // not yet

        platform.set_time(15);
        assert_eq!(kernel.event_try(tid, event), tid); // expired
        assert_eq!(status.get(), Status::ThreadTimeout);
        assert_eq!(sem.pend_waiters_raw(), 0);
    }

    #[test]
    fn signal_post_wakes_only_mask_matching_waiter() {
        let (kernel, _platform) = fixture();
        let sig = leak(SyncObject::signal());
        let tid_high = 20;
        let tid_low = 10;

        // high-priority waiter wants bit 4, low-priority waiter wants bit 0
        kernel.set_running(tid_high);
        let high = &kernel.tcb(tid_high).event;
        kernel.event_init(high, tid_high, 0, None, None, WAIT_FOREVER, 0x10, sig, Action::Pend);
        assert_eq!(kernel.event_try(tid_high, high), 0);

        kernel.set_running(tid_low);
        let low = &kernel.tcb(tid_low).event;
        kernel.event_init(low, tid_low, 0, None, None, WAIT_FOREVER, 0x01, sig, Action::Pend);
        assert_eq!(kernel.event_try(tid_low, low), 0);

        // post bit 0 from a bottom-priority context: only tid_low matches
        kernel.set_running(1);
        let poster = &kernel.tcb(1).event;
        kernel.event_init(poster, 1, 0, None, None, 0, 0x01, sig, Action::Post);
        assert_eq!(kernel.event_try(1, poster), tid_low);
    }

    #[test]
    fn blocking_from_interrupt_or_idle_is_refused() {
        let (kernel, platform) = fixture();
        let sig = leak(SyncObject::signal());
        let status = leak(StatusCell::new());
        let value = leak(ValueCell::new());

        // idle pseudo-thread (ID 0) cannot block
        kernel.set_running(0);
        let control = kernel.pend_signal(0, Some(status), Some(value), 1, 0xffff_ffff, sig);
        assert_eq!(control, Control::Continue);
        assert_eq!(status.get(), Status::BlockErr);

        // neither can an interrupt handler
        kernel.set_running(3);
        platform.enter_interrupt(7);
        let control = kernel.pend_signal(0, Some(status), Some(value), 1, 0xffff_ffff, sig);
        assert_eq!(control, Control::Continue);
        assert_eq!(status.get(), Status::BlockErr);
    }

    #[test]
    fn nonblocking_completion_clears_resume_marker() {
        let (kernel, _platform) = fixture();
        let sem = leak(SyncObject::semaphore(4, 2));
        let status = leak(StatusCell::new());
        let tid = 6;
        kernel.set_running(tid);

        let control = kernel.pend(9, Some(status), None, 0, sem);
        assert_eq!(control, Control::Continue);
        assert_eq!(status.get(), Status::Ok);
        // fell through without blocking: the continuation label is dropped
        assert_eq!(kernel.thread_entry(), 0);
    }

    #[test]
    fn blocking_pend_keeps_resume_marker() {
        let (kernel, _platform) = fixture();
        let sem = leak(SyncObject::semaphore(4, 0));
        let status = leak(StatusCell::new());
        let tid = 6;
        kernel.set_running(tid);

        let control = kernel.pend(9, Some(status), None, WAIT_FOREVER, sem);
        assert_eq!(control, Control::Yield);
        assert_eq!(kernel.thread_entry(), 9);
    }
}
