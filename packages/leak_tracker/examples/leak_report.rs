//! Installs the tracking allocator, leaks a few allocations on purpose and prints the report on the way out of `main()`.
//!
//! Run with `cargo run --example leak_report -p leak_tracker`.

use std::collections::HashMap;
use std::hint::black_box;
use std::io;

use leak_tracker::Allocator;

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[inline(never)]
fn leak_config() -> &'static HashMap<String, String> {
    let mut config = HashMap::new();
    config.insert("mode".to_string(), "leaky".to_string());

    Box::leak(Box::new(config))
}

#[inline(never)]
fn leak_buffer(size: usize) -> &'static mut [u8] {
    Box::leak(vec![0_u8; size].into_boxed_slice())
}

fn main() {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    // Dropped last, after everything else `main()` owns has been freed.
    let _report = ALLOCATOR.report_on_drop();

    // Freed again, so not part of the report.
    for size in [16, 256, 4096] {
        black_box(vec![0_u8; size]);
    }

    black_box(leak_config());
    black_box(leak_buffer(1000));
}
