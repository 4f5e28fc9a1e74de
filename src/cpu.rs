/*
 * CPU Atomic Primitives
 *
 * Word-sized compare-and-swap and count-leading-zeros, the only two
 * operations the rest of the executive builds on. On a hosted target these
 * map straight onto `core::sync::atomic`; a bare-metal port would swap in
 * LL/SC or an interrupt-masked compare here.
 *
 * NOTE: cas() returns true on FAILURE. Every retry loop in the executive is
 * written `while cas(..) {}` against that convention, so keep it.
 */

use core::sync::atomic::{AtomicU32, Ordering};

/// Compare-and-swap on a 32-bit cell.
///
/// Stores `store` if the cell still holds `expected`. Returns `true` when
/// the swap FAILED (cell changed underneath us), `false` on success.
#[inline]
pub fn cas(cell: &AtomicU32, expected: u32, store: u32) -> bool {
    cell.compare_exchange(expected, store, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
}

/// Count leading zeros. Returns 32 for an input of 0.
#[inline]
pub fn clz(x: u32) -> u32 {
    x.leading_zeros()
}
