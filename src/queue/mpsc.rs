/*
 * MPSC Intrusive Stack-FIFO
 *
 * A multi-producer/single-consumer list for caller-owned nodes. Producers
 * CAS themselves onto the head; the one consumer atomically severs the
 * whole chain and walks it. Because producers prepend, the drain order is
 * reversed relative to insertion (LIFO in, reversed FIFO out) - this stack
 * is used where producer ordering does not matter, such as handing timer
 * control blocks to the timer service.
 *
 * Nodes are intrusive: the payload type embeds a `StackLink` and hands the
 * stack a `&'static` reference, so no storage is owned here at all.
 */

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// The link a payload type embeds to become stackable.
pub struct StackLink<T>(AtomicPtr<T>);

impl<T> StackLink<T> {
    pub const fn new() -> Self {
        Self(AtomicPtr::new(ptr::null_mut()))
    }

    pub(crate) fn load(&self) -> *mut T {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn store(&self, p: *mut T) {
        self.0.store(p, Ordering::SeqCst);
    }
}

/// Implemented by payload types that carry their own `StackLink`.
pub trait Linked: Sync + Sized + 'static {
    fn link(&self) -> &StackLink<Self>;
}

/// Lock-free MPSC intrusive stack.
pub struct MpscStack<T: Linked> {
    head: AtomicPtr<T>,
    _items: PhantomData<&'static T>,
}

impl<T: Linked> MpscStack<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _items: PhantomData,
        }
    }

    /// Prepend a node. Any context; the node must not already be on a list.
    pub fn push(&self, item: &'static T) {
        let p = item as *const T as *mut T;
        loop {
            let old = self.head.load(Ordering::SeqCst);
            item.link().store(old);
            if self
                .head
                .compare_exchange(old, p, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }

    /// Sever the whole chain and return an iterator over it. Single
    /// consumer only. The iterator reads each node's link before yielding
    /// the node, so callers may immediately relink drained nodes elsewhere.
    pub fn drain(&self) -> Drain<T> {
        Drain {
            cur: self.head.swap(ptr::null_mut(), Ordering::SeqCst),
        }
    }
}

pub struct Drain<T: Linked> {
    cur: *mut T,
}

impl<T: Linked> Iterator for Drain<T> {
    type Item = &'static T;

    fn next(&mut self) -> Option<&'static T> {
        if self.cur.is_null() {
            return None;
        }
        // Only &'static references enter via push(), so the pointer is
        // valid for 'static.
        let item: &'static T = unsafe { &*self.cur };
        self.cur = item.link().load();
        Some(item)
    }
}
