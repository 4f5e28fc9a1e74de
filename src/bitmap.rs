/*
 * Atomic Bitmap
 *
 * Fixed-width (32 bit) bit array with CAS-mediated set/clear, used for the
 * scheduler's thread lists and for the per-object waiter sets.
 *
 * ## Bit numbering
 *
 * Bits are numbered 1..=32 and bit k corresponds to thread ID k. Bit number
 * 0 is valid for set/clr and means "no bit" (a deliberate no-op, so thread
 * ID 0 can flow through the list bookkeeping without special cases). FF1
 * returns the position of the most significant set bit, which is therefore
 * the highest-priority thread in a thread list.
 *
 * ## Atomicity
 *
 * set/clr retry with CAS and are safe against any mix of threads and
 * interrupt handlers. The bulk boolean operations are plain load/store and
 * are reserved for the scheduler, which is never run concurrently with
 * itself.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::cpu;

#[inline]
fn bit_mask(bit: u32) -> u32 {
    // bit 1 -> 0x0000_0001 ... bit 32 -> 0x8000_0000
    0x8000_0000u32 >> (32 - bit)
}

/// First-one position of a raw word: 1..=32, or 0 if empty.
#[inline]
pub fn ff1_raw(a: u32) -> u32 {
    32 - cpu::clz(a)
}

/// Highest set bit of `list` outside `mask` (the HPT operation).
#[inline]
pub fn hpt(list: u32, mask: u32) -> u32 {
    ff1_raw(list & !mask)
}

pub struct Bitmap {
    word: AtomicU32,
}

impl Bitmap {
    pub const fn new() -> Self {
        Self { word: AtomicU32::new(0) }
    }

    /// Atomically set bit `bit` (1..=32). Bit 0 sets nothing.
    pub fn set(&self, bit: u32) {
        debug_assert!(bit <= 32);
        if bit == 0 {
            return;
        }
        loop {
            let old = self.word.load(Ordering::SeqCst);
            if !cpu::cas(&self.word, old, old | bit_mask(bit)) {
                return;
            }
        }
    }

    /// Atomically clear bit `bit` (1..=32). Bit 0 clears nothing.
    pub fn clr(&self, bit: u32) {
        debug_assert!(bit <= 32);
        if bit == 0 {
            return;
        }
        loop {
            let old = self.word.load(Ordering::SeqCst);
            if !cpu::cas(&self.word, old, old & !bit_mask(bit)) {
                return;
            }
        }
    }

    /// Test bit `bit` (1..=32).
    pub fn state(&self, bit: u32) -> bool {
        debug_assert!(bit != 0 && bit <= 32);
        self.word.load(Ordering::SeqCst) & bit_mask(bit) != 0
    }

    /// True if `bit` names a thread (nonzero) and its bit is set.
    pub fn contains(&self, bit: u32) -> bool {
        bit != 0 && self.state(bit)
    }

    /// Position of the most significant set bit, 0 if empty.
    pub fn ff1(&self) -> u32 {
        ff1_raw(self.raw())
    }

    pub fn raw(&self) -> u32 {
        self.word.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.raw() == 0
    }

    // Bulk boolean operations. Non-atomic read-modify-write; scheduler use
    // only.

    pub fn replace(&self, raw: u32) {
        self.word.store(raw, Ordering::SeqCst);
    }

    pub fn and_raw(&self, raw: u32) {
        self.replace(self.raw() & raw);
    }

    pub fn or_raw(&self, raw: u32) {
        self.replace(self.raw() | raw);
    }

    pub fn xor_raw(&self, raw: u32) {
        self.replace(self.raw() ^ raw);
    }

    pub fn not(&self) {
        self.replace(!self.raw());
    }

    pub fn copy_from(&self, other: &Bitmap) {
        self.replace(other.raw());
    }

    pub fn eq_raw(&self, raw: u32) -> bool {
        self.raw() == raw
    }
}
