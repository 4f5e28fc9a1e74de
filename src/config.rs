/*
 * Compile-Time Configuration
 *
 * Fixed sizing for the executive. Everything here is a hard compile-time
 * bound: the thread table, the list bitmaps and the ID/priority encoding
 * all assume these values.
 */

/// Maximum number of user threads.
///
/// Thread IDs (which double as priorities) run 1..=THREADS_MAX; ID 0 is
/// reserved for "no thread" / the idle pseudo-thread. The thread lists are
/// single 32-bit bitmaps, so this may not exceed 31.
pub const THREADS_MAX: u32 = 31;

/// Default priority for the software timer service thread.
///
/// Passed to [`crate::Kernel::enable_timer_service`] by applications that
/// want the stock configuration. The service is not created unless enabled.
pub const TIMER_THREAD_PRIORITY: u32 = THREADS_MAX;
