/*
 * MPMC Tagged-Index Queue
 *
 * A lock-free multi-producer/multi-consumer queue of 32-bit values, derived
 * from the Michael & Scott two-lock-free-lists construction. Two linked
 * lists are threaded through one node array: `data` carries the enqueued
 * values, `avail` carries the free nodes. A put moves a node from avail to
 * data, a get moves one back.
 *
 * Every list pointer (head, tail, per-node next) is a (tag, index) pair in
 * one 32-bit cell; see `tagged`. Index 0 is reserved as the end-of-list
 * sentinel, and each list keeps a dummy node at its head, so the first real
 * datum lives at head.next.
 *
 * The dequeue recycles the dummy: the value is read out of the node at
 * head.next, head is CAS-advanced onto that node (which becomes the new
 * dummy), and the *old* dummy is handed back as the free node.
 *
 * Safe under any mixture of threads and interrupt handlers.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::cpu;
use crate::tagged::{self, TagSource};

const EOL: u16 = 0;

const UNINIT: u32 = 0;
const INITIALIZING: u32 = 1;
const READY: u32 = 2;

struct Node {
    data: AtomicU32,
    next: AtomicU32, // tagged index
}

/// Lock-free MPMC queue holding up to `N - 3` values.
///
/// `N` is the node count: one reserved sentinel slot plus one dummy per
/// list plus the capacity, matching the storage-allocator layout of the
/// design. `MpmcQueue::<7>` holds 4 entries.
///
/// Storage is static-friendly (`const fn new`); initialization is lazy and
/// happens on the first `put` or `get`.
pub struct MpmcQueue<const N: usize> {
    nodes: [Node; N],
    data_head: AtomicU32,
    data_tail: AtomicU32,
    avail_head: AtomicU32,
    avail_tail: AtomicU32,
    tags: TagSource,
    state: AtomicU32,
}

impl<const N: usize> MpmcQueue<N> {
    pub const fn new() -> Self {
        assert!(N >= 4 && N <= 0xffff);
        Self {
            nodes: [const {
                Node {
                    data: AtomicU32::new(0),
                    next: AtomicU32::new(0),
                }
            }; N],
            data_head: AtomicU32::new(0),
            data_tail: AtomicU32::new(0),
            avail_head: AtomicU32::new(0),
            avail_tail: AtomicU32::new(0),
            tags: TagSource::new(),
            state: AtomicU32::new(UNINIT),
        }
    }

    /// Number of values the queue can hold.
    pub const fn capacity() -> usize {
        N - 3
    }

    /// Insert a value. Returns false when the queue is full.
    pub fn put(&self, value: u32) -> bool {
        self.ensure_init();
        // reserve a free node
        let Some((idx, _)) = self.dequeue(&self.avail_head, &self.avail_tail) else {
            return false;
        };
        self.nodes[idx as usize].data.store(value, Ordering::SeqCst);
        self.enqueue(&self.data_tail, idx);
        true
    }

    /// Remove the oldest value, or None when the queue is empty.
    pub fn get(&self) -> Option<u32> {
        self.ensure_init();
        let (freed, value) = self.dequeue(&self.data_head, &self.data_tail)?;
        self.enqueue(&self.avail_tail, freed);
        Some(value)
    }

    /// Chain the initial lists. First caller wins; latecomers spin until the
    /// structure is usable.
    fn ensure_init(&self) {
        if self.state.load(Ordering::SeqCst) == READY {
            return;
        }
        if cpu::cas(&self.state, UNINIT, INITIALIZING) {
            // someone else is initializing
            while self.state.load(Ordering::SeqCst) != READY {
                core::hint::spin_loop();
            }
            return;
        }

        // data list: dummy at index 1
        self.nodes[1].next.store(self.tags.tagged(EOL), Ordering::SeqCst);
        self.data_head.store(self.tags.tagged(1), Ordering::SeqCst);
        self.data_tail.store(self.tags.tagged(1), Ordering::SeqCst);

        // avail list: dummy at index 2, chain through to the last node
        for i in 2..N - 1 {
            self.nodes[i].next.store(self.tags.tagged((i + 1) as u16), Ordering::SeqCst);
        }
        self.nodes[N - 1].next.store(self.tags.tagged(EOL), Ordering::SeqCst);
        self.avail_head.store(self.tags.tagged(2), Ordering::SeqCst);
        self.avail_tail.store(self.tags.tagged((N - 1) as u16), Ordering::SeqCst);

        self.state.store(READY, Ordering::SeqCst);
    }

    /// Dequeue from one of the lists. Returns the freed (old dummy) index
    /// and the value read from the node that became the new dummy, or None
    /// when the list is empty.
    fn dequeue(&self, head: &AtomicU32, tail: &AtomicU32) -> Option<(u16, u32)> {
        loop {
            let h = head.load(Ordering::SeqCst);
            let t = tail.load(Ordering::SeqCst);
            let h_idx = tagged::data(h);
            let next = self.nodes[h_idx as usize].next.load(Ordering::SeqCst);
            if h != head.load(Ordering::SeqCst) {
                continue; // snapshot torn, retry
            }
            let next_idx = tagged::data(next);
            if h_idx == tagged::data(t) {
                if next_idx == EOL {
                    return None;
                }
                // tail fell behind, help it forward
                cpu::cas(tail, t, self.tags.tagged(next_idx));
                continue;
            }
            // value must be read before the head moves; afterwards the node
            // may be recycled by another producer
            let value = self.nodes[next_idx as usize].data.load(Ordering::SeqCst);
            if !cpu::cas(head, h, self.tags.tagged(next_idx)) {
                return Some((h_idx, value));
            }
        }
    }

    /// Append node `idx` at the tail of one of the lists.
    fn enqueue(&self, tail: &AtomicU32, idx: u16) {
        self.nodes[idx as usize].next.store(self.tags.tagged(EOL), Ordering::SeqCst);
        loop {
            let t = tail.load(Ordering::SeqCst);
            let t_idx = tagged::data(t);
            let next = self.nodes[t_idx as usize].next.load(Ordering::SeqCst);
            if t != tail.load(Ordering::SeqCst) {
                continue;
            }
            let next_idx = tagged::data(next);
            if next_idx == EOL {
                if !cpu::cas(&self.nodes[t_idx as usize].next, next, self.tags.tagged(idx)) {
                    // linked in; the tail swing is best-effort
                    cpu::cas(tail, t, self.tags.tagged(idx));
                    return;
                }
            } else {
                // tail lagging, help it forward and retry
                cpu::cas(tail, t, self.tags.tagged(next_idx));
            }
        }
    }
}
