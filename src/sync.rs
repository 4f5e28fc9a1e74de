/*
 * Synchronization Objects
 *
 * The kernel object kinds the event engine operates on: counting
 * semaphore, mutex with priority hoisting, 32-bit signal set, and the
 * shared delay sentinel. Every object is a common header (kind tag plus
 * the two thread-bitmaps of current waiters) and a kind-specific body.
 *
 * Objects are process-wide singletons identified by address; the `const`
 * constructors are meant for `static` declarations:
 *
 * ```
 * use ritex::SyncObject;
 * static RX_READY: SyncObject = SyncObject::semaphore(8, 0);
 * static BUS: SyncObject = SyncObject::mutex();
 * static WAKE: SyncObject = SyncObject::signal();
 * ```
 *
 * The semaphore/mutex count is a tagged 16-bit value in a 32-bit CAS cell,
 * so concurrent increments and decrements are ABA-free. All mutation goes
 * through the event engine.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::bitmap::Bitmap;
use crate::tagged;

/// Status codes reported by kernel operations.
///
/// Operation outcomes land in the caller's [`StatusCell`]; programming
/// errors never produce a status, they assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    /// Operation completed, no error or event occurred.
    Ok = 0,
    /// Thread pend timed out.
    ThreadTimeout = 0x0802,
    /// Resource not ready and the pend was non-blocking.
    EventNotReady = 0x1001,
    /// Interrupt handlers and the idle thread cannot block.
    BlockErr = 0x1002,
    /// Thread cannot be created.
    ThreadCreateErr = 0x8001,
    /// Requested thread priority is already taken.
    ThreadPriorityErr = 0x8002,
    /// No requested signal bit is set and the pend was non-blocking.
    SignalNone = 0x10001,
    /// Sentinel: no status has been written yet.
    Invalid = 0x7fff_ffff,
}

impl Status {
    pub(crate) fn from_raw(raw: u32) -> Status {
        match raw {
            0 => Status::Ok,
            0x0802 => Status::ThreadTimeout,
            0x1001 => Status::EventNotReady,
            0x1002 => Status::BlockErr,
            0x8001 => Status::ThreadCreateErr,
            0x8002 => Status::ThreadPriorityErr,
            0x10001 => Status::SignalNone,
            _ => Status::Invalid,
        }
    }
}

/// A caller-allocated slot the kernel writes an operation's [`Status`]
/// into. Lives in static storage so the scheduler or an interrupt can
/// complete the operation long after the requesting call returned.
pub struct StatusCell(AtomicU32);

impl StatusCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(Status::Invalid as u32))
    }

    pub fn get(&self) -> Status {
        Status::from_raw(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, status: Status) {
        self.0.store(status as u32, Ordering::SeqCst);
    }
}

/// A caller-allocated slot for an operation's 32-bit return value
/// (semaphore count, matched signal bits, ...).
pub struct ValueCell(AtomicU32);

impl ValueCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, value: u32) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// Kernel object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Semaphore,
    Mutex,
    Signal,
    Delay,
}

pub(crate) enum Body {
    /// Semaphore and mutex share a body; a mutex is max_count = 1 plus an
    /// owner ID used only for priority hoisting.
    Counted {
        /// (tag, count) packed; see `tagged`.
        count: AtomicU32,
        max_count: u16,
        /// Thread that holds the mutex, 0 = free. Unused for semaphores.
        owner: AtomicU32,
    },
    Signal {
        bits: AtomicU32,
    },
    Delay,
}

pub struct SyncObject {
    kind: ObjectKind,
    /// Threads blocked waiting for a post on this object.
    pub(crate) pend_waiters: Bitmap,
    /// Threads blocked waiting for a pend on this object. Posts never
    /// block, so this stays empty; it is kept for the invariant checks.
    pub(crate) post_waiters: Bitmap,
    pub(crate) body: Body,
}

impl SyncObject {
    /// A counting semaphore with the given maximum and initial count.
    pub const fn semaphore(max_count: u16, initial: u16) -> Self {
        Self {
            kind: ObjectKind::Semaphore,
            pend_waiters: Bitmap::new(),
            post_waiters: Bitmap::new(),
            body: Body::Counted {
                count: AtomicU32::new(tagged::pack(0, initial)),
                max_count,
                owner: AtomicU32::new(0),
            },
        }
    }

    /// A mutex. Non-recursive; lock/unlock mismatches assert.
    pub const fn mutex() -> Self {
        Self {
            kind: ObjectKind::Mutex,
            pend_waiters: Bitmap::new(),
            post_waiters: Bitmap::new(),
            body: Body::Counted {
                count: AtomicU32::new(tagged::pack(0, 1)),
                max_count: 1,
                owner: AtomicU32::new(0),
            },
        }
    }

    /// A 32-bit signal set, initially clear.
    pub const fn signal() -> Self {
        Self {
            kind: ObjectKind::Signal,
            pend_waiters: Bitmap::new(),
            post_waiters: Bitmap::new(),
            body: Body::Signal {
                bits: AtomicU32::new(0),
            },
        }
    }

    /// The delay sentinel. One per kernel, owned by the kernel itself.
    pub(crate) const fn delay() -> Self {
        Self {
            kind: ObjectKind::Delay,
            pend_waiters: Bitmap::new(),
            post_waiters: Bitmap::new(),
            body: Body::Delay,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Current semaphore/mutex count. 0 for other kinds.
    pub fn count(&self) -> u16 {
        match &self.body {
            Body::Counted { count, .. } => tagged::data(count.load(Ordering::SeqCst)),
            _ => 0,
        }
    }

    /// Mutex owner thread ID, 0 if free (or not a mutex).
    pub fn owner_id(&self) -> u32 {
        match &self.body {
            Body::Counted { owner, .. } => owner.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    pub(crate) fn set_owner(&self, tid: u32) {
        if let Body::Counted { owner, .. } = &self.body {
            owner.store(tid, Ordering::SeqCst);
        }
    }

    /// Currently latched signal bits. 0 for other kinds.
    pub fn signal_bits(&self) -> u32 {
        match &self.body {
            Body::Signal { bits } => bits.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    /// Raw bitmap of threads waiting for a post on this object.
    pub fn pend_waiters_raw(&self) -> u32 {
        self.pend_waiters.raw()
    }

    /// Raw bitmap of threads waiting for a pend on this object.
    pub fn post_waiters_raw(&self) -> u32 {
        self.post_waiters.raw()
    }
}
