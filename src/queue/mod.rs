/*
 * Lockless Queues
 *
 * The three buffer classes that carry data between interrupt context and
 * thread context:
 *
 * - `mpmc`: multi-producer/multi-consumer tagged-index queue
 *   (Michael-Scott variant), for 32-bit payloads
 * - `spsc`: single-producer/single-consumer ring FIFO for small
 *   fixed-size elements
 * - `mpsc`: multi-producer/single-consumer intrusive stack-FIFO for
 *   caller-owned nodes
 *
 * All three are lock-free; none allocates. Each documents its own
 * concurrency allowance - exceeding it is a contract violation, not a
 * checked error.
 */

pub mod mpmc;
pub mod mpsc;
pub mod spsc;

pub use mpmc::MpmcQueue;
pub use mpsc::{Linked, MpscStack, StackLink};
pub use spsc::SpscRing;
