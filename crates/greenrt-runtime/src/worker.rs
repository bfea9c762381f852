//! Worker thread management
//!
//! Workers are OS threads that pop jobs from their pool's ready queue.
//! A job may start or resume green threads; whatever it does, it returns
//! to the loop when the green thread yields or finishes, and the worker
//! moves on to the next job.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use greenrt_core::{kdebug, kerror, kprint, SchedResult, TaskError, WorkerError};

use crate::context;
use crate::pool::PoolShared;
use crate::ready_queue::{Job, ReadyQueue};
use crate::tls;

/// Join handles of a pool's worker threads
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `shared.num_workers` threads running the worker loop
    pub(crate) fn start(shared: &Arc<PoolShared>, name: &str) -> SchedResult<Self> {
        let mut pool = Self { handles: Vec::with_capacity(shared.num_workers) };
        for worker_id in 0..shared.num_workers {
            let shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", name, worker_id))
                .spawn(move || worker_main_loop(shared, worker_id));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    kerror!("failed to spawn worker {}: {}", worker_id, e);
                    return Err(WorkerError::SpawnFailed.into());
                }
            }
        }
        Ok(pool)
    }

    /// Wait for all workers, except the calling thread if it is one of them
    pub(crate) fn join(self) {
        let me = thread::current().id();
        for handle in self.handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                kerror!("{}", WorkerError::Panicked);
            }
        }
    }
}

/// Run one job to its end, containing panics and ambient state
pub(crate) fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        kerror!("job panicked: {}", TaskError::from_panic(&*payload));
    }
    context::reset_to_default();
}

fn worker_main_loop(shared: Arc<PoolShared>, worker_id: usize) {
    tls::set_worker(shared.key(), worker_id);
    kprint::set_worker_context(Some(worker_id));
    kdebug!("worker started");

    let mut idle_spins: u32 = 0;

    loop {
        if let Some(job) = shared.queue.pop(worker_id) {
            idle_spins = 0;
            run_job(job);
            shared.completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            kdebug!("shutdown signaled, exiting");
            break;
        }

        if idle_spins < shared.idle_spins {
            // Quick spin first (catch fast queue -> run cycles)
            idle_spins += 1;
            for _ in 0..32 {
                std::hint::spin_loop();
            }
            thread::yield_now();
        } else {
            shared.parking.park(Some(shared.park_timeout));
            idle_spins = 0;
        }
    }

    tls::clear_worker();
    kprint::set_worker_context(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AsyncLocal;

    #[test]
    fn test_run_job_contains_panic_and_resets_context() {
        let local = AsyncLocal::<u32>::new();
        run_job(Box::new(move || {
            local.set(1);
            panic!("job failure");
        }));
        assert_eq!(local.get(), None);

        run_job(Box::new(move || local.set(2)));
        assert_eq!(local.get(), None);
    }
}
