/*
 * Kernel
 *
 * The executive instance: thread table, the three scheduling lists, the
 * running-thread ID, the shared delay sentinel and the timer service, all
 * packaged behind one struct taken by shared reference. There is no global;
 * applications put the kernel in a `static` and hand `&'static Kernel` to
 * their threads, tests leak one per scenario.
 *
 * ## Threads without stacks
 *
 * A thread is a plain function dispatched on the single hardware stack. It
 * runs until an operation must block, at which point the operation returns
 * `Control::Yield` and the thread function itself must return to the
 * trampoline. When the thread is next dispatched the function is called
 * again from the top; `thread_entry` hands it the resume marker it passed
 * to the blocking call so it can jump back into its state machine:
 *
 * ```no_run
 * use ritex::{Control, Kernel, StatusCell, SyncObject, ValueCell, WAIT_FOREVER};
 *
 * static DATA_READY: SyncObject = SyncObject::semaphore(8, 0);
 * static STATUS: StatusCell = StatusCell::new();
 * static COUNT: ValueCell = ValueCell::new();
 *
 * fn consumer(k: &'static Kernel, _arg: usize) {
 *     let mut at = k.thread_entry();
 *     loop {
 *         match at {
 *             0 => {
 *                 // resume point 1 is the arm to continue in once the
 *                 // pend completes
 *                 if k.pend(1, Some(&STATUS), Some(&COUNT), WAIT_FOREVER, &DATA_READY)
 *                     .must_yield()
 *                 {
 *                     return;
 *                 }
 *                 at = 1;
 *             }
 *             1 => {
 *                 // ... consume ...
 *                 at = 0;
 *             }
 *             _ => unreachable!(),
 *         }
 *     }
 * }
 * ```
 *
 * Operations that complete without blocking fall straight through, so a
 * thread with a single loop-shaped pend pays no ceremony beyond the match.
 */

pub(crate) mod event;
pub(crate) mod sched;

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::THREADS_MAX;
use crate::platform::Platform;
use crate::sync::{Status, StatusCell, SyncObject, ValueCell};
use crate::tagged::TagSource;
use crate::timer::TimerService;
use crate::bitmap::Bitmap;

use event::{Action, Event};
use sched::Dispatch;

pub use event::time_diff;

/// Thread identifier, 1..=THREADS_MAX. Doubles as the thread's priority
/// (higher = more urgent); 0 is "no thread" / the idle pseudo-thread.
pub type ThreadId = u32;

/// A thread body. Dispatched from the top on every resume; see the module
/// docs for the yield protocol.
pub type ThreadFn = fn(&'static Kernel, usize);

/// Timeout encoding: return immediately instead of blocking.
pub const WAIT_NONE: u32 = 0;
/// Largest usable timeout delay in milliseconds.
pub const WAIT_MAX: u32 = 0x7fff_ffff;
/// Timeout encoding: block until the operation completes.
pub const WAIT_FOREVER: u32 = 0xffff_ffff;

/// What the caller of a pend/post-class operation must do next.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The operation is over (status cell says how); keep running.
    Continue,
    /// The thread must return to the trampoline now.
    Yield,
}

impl Control {
    pub fn must_yield(self) -> bool {
        self == Control::Yield
    }
}

/// Thread control block. One per priority slot, embedded in the kernel.
pub(crate) struct Tcb {
    entry: Cell<Option<ThreadFn>>,
    arg: Cell<usize>,
    name: Cell<Option<&'static str>>,
    /// Continuation label for the next dispatch; 0 = run from entry.
    resume: AtomicU32,
    pub(crate) event: Event,
}

// The Cell fields are written on creation (before the thread can be
// scheduled) and only read afterwards; everything mutable at runtime is an
// atomic. The scheduler, which is serialized by the platform, is the only
// concurrent walker of foreign TCBs.
unsafe impl Sync for Tcb {}

impl Tcb {
    const fn new() -> Self {
        Self {
            entry: Cell::new(None),
            arg: Cell::new(0),
            name: Cell::new(None),
            resume: AtomicU32::new(0),
            event: Event::new(),
        }
    }

    pub(crate) fn set_resume(&self, marker: u32) {
        self.resume.store(marker, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn resume_marker(&self) -> u32 {
        self.resume.load(Ordering::SeqCst)
    }
}

/// The executive. See the module docs.
pub struct Kernel {
    platform: &'static dyn Platform,
    tcbs: [Tcb; THREADS_MAX as usize + 1],
    pub(crate) ready: Bitmap,
    pub(crate) waiting: Bitmap,
    pub(crate) interrupted: Bitmap,
    running: AtomicU32,
    pub(crate) sched_active: AtomicBool,
    tags: TagSource,
    delay_obj: SyncObject,
    pub(crate) timer: TimerService,
}

impl Kernel {
    pub const fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            tcbs: [const { Tcb::new() }; THREADS_MAX as usize + 1],
            ready: Bitmap::new(),
            waiting: Bitmap::new(),
            interrupted: Bitmap::new(),
            running: AtomicU32::new(0),
            sched_active: AtomicBool::new(false),
            tags: TagSource::new(),
            delay_obj: SyncObject::delay(),
            timer: TimerService::new(),
        }
    }

    /// Create a thread at the given unique priority and add it to the
    /// ready list. All threads are expected to exist before
    /// [`Kernel::start`].
    pub fn thread_create(
        &self,
        entry: ThreadFn,
        arg: usize,
        priority: u32,
        name: Option<&'static str>,
    ) -> Status {
        if priority == 0 || priority > THREADS_MAX {
            return Status::ThreadCreateErr;
        }
        let tcb = self.tcb(priority);
        if tcb.entry.get().is_some() {
            return Status::ThreadPriorityErr;
        }
        tcb.entry.set(Some(entry));
        tcb.arg.set(arg);
        tcb.name.set(name);
        self.ready.set(priority);

        log::info!(
            "created thread {} '{}'",
            priority,
            name.unwrap_or("<unnamed>")
        );
        Status::Ok
    }

    /// Run the executive. Never returns.
    pub fn start(&'static self) -> ! {
        log::info!("kernel start, {} priority slots", THREADS_MAX);
        loop {
            self.dispatch_once(false);
        }
    }

    /// One trampoline iteration: run the scheduler (re-running while it has
    /// pended itself), then transfer control to the selected thread until
    /// it yields back. Returns the thread that was selected.
    ///
    /// `from_interrupt` is true when this stands in for the
    /// interrupt-exit dispatch of a preempted system, which test harnesses
    /// use together with simulated interrupt context.
    pub fn dispatch_once(&'static self, from_interrupt: bool) -> ThreadId {
        let mut selected = self.schedule(from_interrupt);
        while self.platform.take_scheduler_pend() {
            selected = self.schedule(from_interrupt);
        }
        match selected {
            Dispatch::Entry(tid) => {
                let tcb = self.tcb(tid);
                if let Some(entry) = tcb.entry.get() {
                    entry(self, tcb.arg.get());
                } else {
                    debug_assert!(false, "dispatch of a thread never created");
                }
                tid
            }
            // the thread's frame is on the interrupted stack; on real
            // hardware the exception return pops it, on the hosted
            // platform the simulated interrupt simply falls back into it
            Dispatch::Stacked(tid) => tid,
        }
    }

    /// ID (= priority) of the running thread; 0 from the idle hook or
    /// before the first dispatch.
    pub fn thread_id(&self) -> ThreadId {
        self.running.load(Ordering::SeqCst)
    }

    /// Consume the resume marker on dispatch. 0 means run from the top.
    pub fn thread_entry(&self) -> u32 {
        self.tcb(self.thread_id()).resume.swap(0, Ordering::SeqCst)
    }

    /// Milliseconds since the kernel started.
    pub fn time_ms(&self) -> u32 {
        self.platform.time_ms()
    }

    /// Kernel time as (milliseconds, microseconds-within-millisecond).
    pub fn time_parts(&self) -> (u32, u32) {
        (self.platform.time_ms(), self.platform.time_us_part())
    }

    /// Wait on `object`. The matched value (semaphore count, ...) lands in
    /// `value`, the outcome in `status`; `resume` is the continuation label
    /// handed back by [`Kernel::thread_entry`] after a block.
    pub fn pend(
        &'static self,
        resume: u32,
        status: Option<&'static StatusCell>,
        value: Option<&'static ValueCell>,
        timeout: u32,
        object: &'static SyncObject,
    ) -> Control {
        self.pend_post(resume, status, value, timeout, 0, object, Action::Pend)
    }

    /// Deposit `value` on `object` (count increment, mutex release).
    /// Posts never block; `timeout` is reserved as 0.
    pub fn post(
        &'static self,
        resume: u32,
        status: Option<&'static StatusCell>,
        value: u32,
        timeout: u32,
        object: &'static SyncObject,
    ) -> Control {
        self.pend_post(resume, status, None, timeout, value, object, Action::Post)
    }

    /// Wait for any bit of `mask` in a signal object. Matched bits are
    /// cleared from the signal and reported through `value`.
    pub fn pend_signal(
        &'static self,
        resume: u32,
        status: Option<&'static StatusCell>,
        value: Option<&'static ValueCell>,
        timeout: u32,
        mask: u32,
        object: &'static SyncObject,
    ) -> Control {
        self.pend_post(resume, status, value, timeout, mask, object, Action::Pend)
    }

    /// OR `bits` into a signal object. Never blocks, never fails.
    pub fn post_signal(
        &'static self,
        resume: u32,
        status: Option<&'static StatusCell>,
        bits: u32,
        object: &'static SyncObject,
    ) -> Control {
        self.pend_post(resume, status, None, 0, bits, object, Action::Post)
    }

    /// Block for `delay_ms` milliseconds (clamped to [`WAIT_MAX`]).
    /// A zero delay completes immediately.
    pub fn delay(&'static self, resume: u32, delay_ms: u32) -> Control {
        if delay_ms == 0 {
            return Control::Continue;
        }
        self.pend_post(resume, None, None, delay_ms, 0, &self.delay_obj, Action::Pend)
    }

    /// Block until the kernel clock reaches `kernel_ms` (at most
    /// [`WAIT_MAX`] ahead; rollover is allowed).
    pub fn delay_until(&'static self, resume: u32, kernel_ms: u32) -> Control {
        self.delay(resume, kernel_ms.wrapping_sub(self.time_ms()))
    }

    // Introspection: raw thread-list bitmaps (bit k-1 = thread k). Meant
    // for diagnostics and tests.

    pub fn ready_threads(&self) -> u32 {
        self.ready.raw()
    }

    pub fn waiting_threads(&self) -> u32 {
        self.waiting.raw()
    }

    pub fn interrupted_threads(&self) -> u32 {
        self.interrupted.raw()
    }

    /// The shared delay sentinel object.
    pub fn delay_object(&self) -> &SyncObject {
        &self.delay_obj
    }

    /// Name given at creation, if the slot is in use.
    pub fn thread_name(&self, tid: ThreadId) -> Option<&'static str> {
        if tid == 0 || tid > THREADS_MAX {
            return None;
        }
        self.tcb(tid).name.get()
    }

    // crate-internal plumbing

    pub(crate) fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    pub(crate) fn tcb(&self, tid: ThreadId) -> &Tcb {
        debug_assert!(tid <= THREADS_MAX);
        &self.tcbs[tid as usize]
    }

    pub(crate) fn tags(&self) -> &TagSource {
        &self.tags
    }

    pub(crate) fn in_scheduler(&self) -> bool {
        self.sched_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, tid: ThreadId) {
        debug_assert!(tid <= THREADS_MAX);
        self.running.store(tid, Ordering::SeqCst);
    }
}
