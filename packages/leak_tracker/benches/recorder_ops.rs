//! Basic benchmarks for the `leak_tracker` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::ptr::{self, NonNull};

use criterion::{Criterion, criterion_group, criterion_main};
use leak_tracker::{MAX_BACKTRACE_DEPTH, Recorder};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const PREFILL: usize = 10_000;

fn address(i: usize) -> NonNull<u8> {
    NonNull::new(ptr::without_provenance_mut(0x1000 + i * 16)).unwrap()
}

fn prefilled(backtrace_depth: usize) -> Recorder {
    let recorder = Recorder::builder()
        .table_capacity(PREFILL)
        .backtrace_depth(backtrace_depth)
        .build()
        .unwrap();

    for i in 0..PREFILL {
        recorder.record_allocation(address(i), 64);
    }

    recorder
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("leak_tracker");

    group.bench_function("record_retire_no_backtrace", |b| {
        let recorder = prefilled(0);

        b.iter(|| {
            recorder.record_allocation(address(PREFILL), 64);
            black_box(recorder.retire_allocation(address(PREFILL)));
        });
    });

    group.bench_function("record_retire_full_backtrace", |b| {
        let recorder = prefilled(MAX_BACKTRACE_DEPTH);

        b.iter(|| {
            recorder.record_allocation(address(PREFILL), 64);
            black_box(recorder.retire_allocation(address(PREFILL)));
        });
    });

    group.bench_function("reallocate", |b| {
        let recorder = prefilled(0);
        recorder.record_allocation(address(PREFILL), 64);

        b.iter(|| {
            recorder.record_reallocation(address(PREFILL), address(PREFILL + 1), 128);
            recorder.record_reallocation(address(PREFILL + 1), address(PREFILL), 64);
        });
    });

    group.bench_function("untracked_free", |b| {
        let recorder = prefilled(0);

        b.iter(|| black_box(recorder.retire_allocation(address(PREFILL + 1))));
    });

    group.finish();
}
