/*
 * Console demo: the executive running on the hosted platform with a real
 * sleeping idle hook.
 *
 * Two worker threads print and then delay for a pseudo-random interval;
 * a third thread ticks exactly once a second using delay_until. The idle
 * hook sleeps the process until the next thread timeout and reports the
 * time back, which is what keeps the kernel clock moving.
 *
 * Run with `cargo run --bin console`.
 */

use core::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use log::LevelFilter;
use ritex::{HostedPlatform, Kernel, Status};

static PLATFORM: HostedPlatform = HostedPlatform::new();
static KERNEL: Kernel = Kernel::new(&PLATFORM);

/// Minimal console logger behind the `log` facade.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

// xorshift state per worker; thread locals do not survive a yield, so
// anything a thread keeps across blocking points lives in statics
static SEEDS: [AtomicU32; 2] = [AtomicU32::new(0x1234_5678), AtomicU32::new(0x8765_4321)];

fn next_rand(slot: usize) -> u32 {
    let seed = &SEEDS[slot];
    let mut x = seed.load(Ordering::SeqCst);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    seed.store(x, Ordering::SeqCst);
    x
}

/// Print, sleep a random while, repeat. The loop body is its own
/// continuation, so the resume marker needs no dispatching here.
fn worker(k: &'static Kernel, arg: usize) {
    let _ = k.thread_entry();
    loop {
        let r = next_rand(arg) % 1000 + 1;
        println!(
            "{:6}: task {}, delay until {} ms",
            k.time_ms(),
            k.thread_id(),
            k.time_ms() + r
        );
        if k.delay(1, r).must_yield() {
            return;
        }
    }
}

static NEXT_SEC: AtomicU32 = AtomicU32::new(1);

/// Absolute-time ticker: wakes at every full second regardless of how
/// long the printing takes.
fn seconds(k: &'static Kernel, _arg: usize) {
    let mut at = k.thread_entry();
    loop {
        match at {
            0 => {
                let target = 1000 * NEXT_SEC.load(Ordering::SeqCst);
                if k.delay_until(1, target).must_yield() {
                    return;
                }
                at = 1;
            }
            1 => {
                println!("{:6}: second {}", k.time_ms(), NEXT_SEC.load(Ordering::SeqCst));
                NEXT_SEC.fetch_add(1, Ordering::SeqCst);
                at = 0;
            }
            _ => unreachable!(),
        }
    }
}

/// Sleep the process until the next thread timeout and report it, so the
/// kernel clock advances in step with wall time.
fn idle_sleep(sleep_for_ms: i32) -> u32 {
    let ms = if sleep_for_ms <= 0 { 1 } else { sleep_for_ms as u32 };
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
    ms
}

fn main() {
    match log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info)) {
        Ok(()) => {}
        Err(err) => panic!("logger init failed: {err}"),
    }

    PLATFORM.set_idle_hook(idle_sleep);

    assert_eq!(KERNEL.thread_create(worker, 0, 1, Some("task 1")), Status::Ok);
    assert_eq!(KERNEL.thread_create(worker, 1, 2, Some("task 2")), Status::Ok);
    assert_eq!(
        KERNEL.thread_create(seconds, 0, 3, Some("task second")),
        Status::Ok
    );

    println!("starting scheduler");
    KERNEL.start();
}
