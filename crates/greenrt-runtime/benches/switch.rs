//! Green-thread switch benchmarks
//!
//! # Benchmark Categories
//!
//! 1. **Start to completion**: reserve a stack, switch in, run an empty body, switch out
//! 2. **Yield/resume round trip**: one resume plus one yield on a live green thread
//! 3. **Task path**: `run_as_green_thread` and scheduled work items end to end

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use greenrt_runtime::scheduler::spawn;
use greenrt_runtime::switch;
use greenrt_runtime::task::wait_all;
use greenrt_runtime::run_as_green_thread;

// =============================================================================
// Stack-Switch Primitive
// =============================================================================

fn bench_start_complete(c: &mut Criterion) {
    c.bench_function("start_to_completion", |b| {
        b.iter(|| {
            let suspended = switch::start(|| {
                black_box(1u64);
            })
            .unwrap();
            assert!(suspended.is_none());
        })
    });
}

fn bench_yield_resume(c: &mut Criterion) {
    c.bench_function("yield_resume_round_trip", |b| {
        let mut slot = switch::start(|| loop {
            match switch::yield_current(Box::new(())) {
                Ok(v) if v.downcast_ref::<bool>() == Some(&true) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        })
        .unwrap();

        b.iter(|| {
            let ctx = slot.take().unwrap();
            slot = switch::resume(ctx, Box::new(false));
        });

        let ctx = slot.take().unwrap();
        assert!(switch::resume(ctx, Box::new(true)).is_none());
    });
}

// =============================================================================
// Task Path
// =============================================================================

fn bench_run_as_green_thread(c: &mut Criterion) {
    c.bench_function("run_as_green_thread", |b| {
        b.iter(|| {
            let task = run_as_green_thread(|| black_box(7u32));
            task.result().unwrap()
        })
    });
}

fn bench_scheduled_items(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduled_items");
    for count in [100usize, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let tasks: Vec<_> = (0..count)
                    .map(|i| spawn(move || black_box(i)).unwrap())
                    .collect();
                wait_all(&tasks).unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_start_complete,
    bench_yield_resume,
    bench_run_as_green_thread,
    bench_scheduled_items
);
criterion_main!(benches);
