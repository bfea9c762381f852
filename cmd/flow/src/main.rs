//! Execution context flow across green-thread yields
//!
//! Runs three scenarios and exits non-zero if any ambient value is wrong:
//! 1. A value set by the caller flows into green threads and survives a
//!    yield, even when the green thread resumes on another OS thread
//! 2. A green thread started under the default context sees no value
//! 3. With flow suppressed, green threads start under the default context,
//!    and suppressing again inside them does not affect the yield
//!
//! # Environment Variables
//!
//! - `GREENRT_FLUSH_EPRINT=1` - Flush log output immediately
//! - `GREENRT_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use greenrt::{
    current_thread_id, delay, kinfo, run_as_green_thread, wait_all, AsyncLocal, ExecutionContext,
};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TASKS: usize = 8;
const YIELD_FOR: Duration = Duration::from_millis(200);

fn where_am_i() -> String {
    format!(
        "OS thread: {} | logical thread: {}",
        std::thread::current().name().unwrap_or("main"),
        current_thread_id()
    )
}

fn fail(result: &AtomicU8, code: u8, what: &str, seen: u32) {
    println!("  Failure {} - {} | asyncLocal: {}", what, where_am_i(), seen);
    result.store(code, Ordering::SeqCst);
}

// GREENRT_LOG_LEVEL=debug cargo run -p greenrt-flow
fn main() -> ExitCode {
    greenrt::init_logging();
    let result = Arc::new(AtomicU8::new(0));
    let local = AsyncLocal::<u32>::new();

    println!("Test flow of non-default execution context");
    local.set(1);
    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let result = Arc::clone(&result);
            run_as_green_thread(move || {
                let before = local.value();
                println!("  Before yield - {} | asyncLocal: {}", where_am_i(), before);
                if before != 1 {
                    fail(&result, 1, "before yield", before);
                }

                local.set(2);
                delay(YIELD_FOR).wait().ok();

                let after = local.value();
                println!("  After yield - {} | asyncLocal: {}", where_am_i(), after);
                if after != 2 {
                    fail(&result, 1, "after yield", after);
                }
            })
        })
        .collect();
    if let Err(e) = wait_all(&tasks) {
        println!("  Task failed: {}", e);
        result.store(1, Ordering::SeqCst);
    }

    println!("Test with default execution context");
    ExecutionContext::run(&ExecutionContext::default(), || {
        let result = Arc::clone(&result);
        let task = run_as_green_thread(move || {
            let seen = local.value();
            println!("  {} | asyncLocal: {}", where_am_i(), seen);
            if seen != 0 {
                fail(&result, 2, "in default context", seen);
            }
        });
        task.wait().ok();
    });

    println!("Test suppressed flow of non-default execution context");
    let tasks: Vec<_> = {
        let _flow = ExecutionContext::suppress_flow();
        (0..TASKS)
            .map(|_| {
                let result = Arc::clone(&result);
                run_as_green_thread(move || {
                    let before = local.value();
                    println!("  Before yield - {} | asyncLocal: {}", where_am_i(), before);
                    if before != 0 {
                        fail(&result, 3, "before yield", before);
                    }

                    // The context travels with the green thread, so suppression
                    // does not stop it flowing across the yield
                    local.set(2);
                    {
                        let _flow = ExecutionContext::suppress_flow();
                        delay(YIELD_FOR).wait().ok();
                    }

                    let after = local.value();
                    println!("  After yield - {} | asyncLocal: {}", where_am_i(), after);
                    if after != 2 {
                        fail(&result, 3, "after yield", after);
                    }
                })
            })
            .collect()
    };
    if let Err(e) = wait_all(&tasks) {
        println!("  Task failed: {}", e);
        result.store(3, Ordering::SeqCst);
    }

    let code = result.load(Ordering::SeqCst);
    kinfo!("flow scenarios finished with code {}", code);
    ExitCode::from(code)
}
