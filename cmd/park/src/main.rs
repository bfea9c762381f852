//! Park many green threads on one completion source
//!
//! Starts N work items on the green-thread scheduler. Each recurses a few
//! levels, leaving a marker word in every frame, then waits on a shared
//! gate. While all of them are parked the GC root registry is scanned
//! repeatedly; every parked stack must still show all of its markers.
//! Then the gate opens and each item checks its own frames on the way out.
//!
//! # Usage
//!
//! ```text
//! park [threads] [depth] [scans]
//! ```
//!
//! # Environment Variables
//!
//! - `GREENRT_NUM_WORKERS` - Worker threads hosting the green threads
//! - `GREENRT_MAX_GREEN_THREADS` - Must be at least `threads`
//! - `GREENRT_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use greenrt::{
    current_thread_id, gc, kinfo, stats, wait_all, LogicalThreadId, Runtime, SchedulerConfig,
    Task, TaskCompletionSource,
};
use std::collections::HashMap;
use std::hint::black_box;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MARKER: usize = 0xbb67_ae85_84ca_a73b;

#[inline(never)]
fn descend(level: usize, depth: usize, gate: &Task<()>) -> bool {
    let frame = [MARKER, level];
    black_box(&frame);
    let below = if level + 1 < depth {
        descend(level + 1, depth, gate)
    } else {
        gate.wait().is_ok()
    };
    below && *black_box(&frame) == [MARKER, level]
}

fn arg(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// GREENRT_LOG_LEVEL=info cargo run --release -p greenrt-park -- 10000 100 100
fn main() -> ExitCode {
    greenrt::init_logging();
    let threads = arg(1, 10_000);
    let depth = arg(2, 100);
    let scans = arg(3, 100);

    let config = SchedulerConfig::default().max_green_threads(threads.max(1024));
    let mut runtime = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            println!("bad configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ok = runtime.block_on(|rt| {
        let gate = TaskCompletionSource::<()>::new();
        let owners = Arc::new(Mutex::new(Vec::with_capacity(threads)));
        let arrived = Arc::new(AtomicUsize::new(0));

        println!("=== Parking {} green threads, {} frames deep ===\n", threads, depth);
        let start = Instant::now();
        let mut tasks = Vec::with_capacity(threads);
        for _ in 0..threads {
            let waited = gate.task();
            let owners = Arc::clone(&owners);
            let arrived = Arc::clone(&arrived);
            let spawned = rt.spawn(move || {
                if let Ok(mut owners) = owners.lock() {
                    owners.push(current_thread_id());
                }
                arrived.fetch_add(1, Ordering::SeqCst);
                descend(0, depth, &waited)
            });
            match spawned {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    println!("spawn failed: {}", e);
                    return false;
                }
            }
        }

        let owners: Vec<LogicalThreadId> = loop {
            let parked = gc::roots().parked_count();
            if arrived.load(Ordering::SeqCst) == threads && parked >= threads {
                break owners.lock().map(|o| o.clone()).unwrap_or_default();
            }
            if start.elapsed() > Duration::from_secs(60) {
                println!("WARNING: only {} of {} parked", parked, threads);
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        println!("All parked in {:?}", start.elapsed());

        let scan_start = Instant::now();
        let mut clean = true;
        for round in 0..scans {
            let mut hits: HashMap<LogicalThreadId, usize> = HashMap::with_capacity(threads);
            let words = gc::roots().scan_parked(|owner, _slot, word| {
                if word == MARKER {
                    *hits.entry(owner).or_default() += 1;
                }
            });
            let short = owners
                .iter()
                .filter(|id| hits.get(id).copied().unwrap_or(0) < depth)
                .count();
            if short > 0 {
                println!("scan {}: {} stacks missing markers", round, short);
                clean = false;
            }
            if round == 0 {
                println!("Scan visits {} words", words);
            }
        }
        println!("{} scans in {:?}", scans, scan_start.elapsed());

        let release = Instant::now();
        gate.set_result(());
        let finished = wait_all(&tasks).is_ok();
        let intact = tasks.iter().filter(|t| t.result() == Ok(true)).count();
        println!("Released in {:?}; {} of {} intact", release.elapsed(), intact, threads);
        kinfo!("{}", stats::snapshot());

        clean && finished && intact == threads
    });

    println!("\n=== {} ===", if ok { "PASS" } else { "FAIL" });
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
