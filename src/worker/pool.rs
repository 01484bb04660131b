// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::worker::{
    config::ExecutionConfig,
    error::WorkerPoolError,
    event_queue::{EventQueue, EventQueueHandle, TAG_SHUTDOWN},
    execution_context::{ExecutionContext, WakeHandle},
    rundown::{Rundown, RundownGuard},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// Number of consecutive no-work loop iterations before a worker yields the
/// scheduler, matching `platform_worker.c`'s idle-spin threshold.
const IDLE_YIELD_THRESHOLD: u32 = 10;
/// How often a worker prunes its registered dynamic pool allocators.
const POOL_PRUNE_PERIOD: Duration = Duration::from_secs(1);
/// How many items a single prune pass frees per pool.
const POOL_PRUNE_COUNT: usize = 8;
/// Upper bound on how long a worker ever blocks in one event-queue wait,
/// so pool pruning and any lost wake (see `WakeHandle`) are bounded.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Something a worker periodically asks to release unused, cached memory.
pub trait DynamicPool: Send + Sync {
    /// Frees up to `count` unused items. Returns the number actually freed,
    /// purely for instrumentation.
    fn prune(&self, count: usize) -> usize;
}

#[derive(Default)]
struct StatsInner {
    loop_count: AtomicU64,
    ec_poll_count: AtomicU64,
    ec_run_count: AtomicU64,
    cqe_count: AtomicU64,
}

/// A snapshot of one worker's debug counters (`#if DEBUG` fields in
/// `platform_worker.c`: `LoopCount`, `EcPollCount`, `EcRunCount`,
/// `CqeCount`). Only updated when `cfg!(debug_assertions)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub loop_count: u64,
    pub ec_poll_count: u64,
    pub ec_run_count: u64,
    pub cqe_count: u64,
}

struct OwnedContext {
    ctx: Box<dyn ExecutionContext>,
    ready: Arc<AtomicBool>,
}

struct Shared {
    pending_contexts: Mutex<Vec<OwnedContext>>,
    pending_pools: Mutex<Vec<Arc<dyn DynamicPool>>>,
    pending_pool_removals: Mutex<Vec<Arc<dyn DynamicPool>>>,
    running: Arc<AtomicBool>,
    wake_tx: mpsc::Sender<()>,
    stats: StatsInner,
    shutdown: AtomicBool,
    event_queue: Arc<Mutex<EventQueue>>,
}

struct WorkerHandle {
    thread: std::thread::JoinHandle<()>,
    shared: Arc<Shared>,
}

/// A per-processor pool of OS threads cooperatively running registered
/// [`ExecutionContext`]s. Mirrors `CXPLAT_WORKER_POOL` in
/// `platform_worker.c`: one thread per processor, each with its own event
/// queue and execution-context list.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    rundown: Rundown,
}

/// An external reference against a [`WorkerPool`], taken via
/// [`WorkerPool::add_ref`]. Blocks `shutdown` from tearing down workers
/// until every such reference is dropped or passed to
/// [`WorkerPool::release`]. Mirrors `CxPlatWorkerPoolAddRef`/`Release`.
pub struct WorkerPoolRef {
    guard: RundownGuard,
}

impl WorkerPool {
    /// Spawns one worker thread per entry in `config`'s processor list.
    pub fn create(config: &ExecutionConfig) -> Result<Self, WorkerPoolError> {
        let processors = config.resolved_processor_list();
        if processors.is_empty() {
            return Err(WorkerPoolError::InvalidProcessorList);
        }

        let rundown = Rundown::new();
        let mut workers = Vec::with_capacity(processors.len());

        for processor in processors {
            let event_queue = Arc::new(Mutex::new(EventQueue::new().map_err(WorkerPoolError::EventQueue)?));
            let (wake_tx, wake_rx) = mpsc::channel();
            let shared = Arc::new(Shared {
                pending_contexts: Mutex::new(Vec::new()),
                pending_pools: Mutex::new(Vec::new()),
                pending_pool_removals: Mutex::new(Vec::new()),
                running: Arc::new(AtomicBool::new(false)),
                wake_tx,
                stats: StatsInner::default(),
                shutdown: AtomicBool::new(false),
                event_queue,
            });

            let thread_shared = shared.clone();
            let flags = config.flags;
            let thread = std::thread::Builder::new()
                .name(format!("quic-stream-rt-worker-{processor}"))
                .spawn(move || {
                    if flags.affinitize || !flags.no_ideal_proc {
                        affinitize_current_thread(processor);
                    }
                    tracing::info!(processor, "worker thread starting");
                    run_worker(&thread_shared, wake_rx);
                    tracing::info!(processor, "worker thread stopped");
                })
                .map_err(WorkerPoolError::Thread)?;

            workers.push(WorkerHandle { thread, shared });
        }

        Ok(Self { workers, rundown })
    }

    pub fn processor_count(&self) -> usize {
        self.workers.len()
    }

    /// Registers `ctx` on the given worker, returning a handle other
    /// threads can use to wake it.
    pub fn add_execution_context(
        &self,
        processor_index: usize,
        ctx: Box<dyn ExecutionContext>,
    ) -> Result<WakeHandle, WorkerPoolError> {
        let worker = self
            .workers
            .get(processor_index)
            .ok_or(WorkerPoolError::InvalidProcessorList)?;
        let ready = Arc::new(AtomicBool::new(true));
        let handle = WakeHandle::new(ready.clone(), worker.shared.running.clone(), worker.shared.wake_tx.clone());

        let mut pending = worker.shared.pending_contexts.lock().unwrap();
        let was_empty = pending.is_empty();
        pending.push(OwnedContext { ctx, ready });
        drop(pending);
        if was_empty {
            let _ = worker.shared.wake_tx.send(());
        }
        Ok(handle)
    }

    /// Registers a dynamic pool for periodic pruning on the given worker.
    pub fn add_dynamic_pool(&self, processor_index: usize, pool: Arc<dyn DynamicPool>) -> Result<(), WorkerPoolError> {
        let worker = self
            .workers
            .get(processor_index)
            .ok_or(WorkerPoolError::InvalidProcessorList)?;
        worker.shared.pending_pools.lock().unwrap().push(pool);
        Ok(())
    }

    /// Unregisters a dynamic pool previously added with `add_dynamic_pool`,
    /// identified by `Arc` identity. Takes effect the next time the owning
    /// worker merges its pending queues.
    pub fn remove_dynamic_pool(&self, processor_index: usize, pool: &Arc<dyn DynamicPool>) -> Result<(), WorkerPoolError> {
        let worker = self
            .workers
            .get(processor_index)
            .ok_or(WorkerPoolError::InvalidProcessorList)?;
        worker.shared.pending_pool_removals.lock().unwrap().push(pool.clone());
        Ok(())
    }

    /// Returns a handle to the given worker's event queue, so an embedder
    /// can submit its own I/O (socket reads/writes, timers) onto the same
    /// ring this worker already polls every loop iteration. Mirrors
    /// `CxPlatWorkerPoolGetEventQ`.
    pub fn get_event_queue(&self, processor_index: usize) -> Option<EventQueueHandle> {
        let worker = self.workers.get(processor_index)?;
        Some(EventQueueHandle(worker.shared.event_queue.clone()))
    }

    /// Takes an external reference against this pool, blocking `shutdown`
    /// until it (and every other outstanding reference) is released or
    /// dropped. Returns `None` once shutdown has already started. Mirrors
    /// `CxPlatWorkerPoolAddRef`.
    pub fn add_ref(&self) -> Option<WorkerPoolRef> {
        self.rundown.acquire().map(|guard| WorkerPoolRef { guard })
    }

    /// Releases a reference taken via `add_ref`. Equivalent to dropping it;
    /// spelled out so call sites can pair `add_ref`/`release` the way
    /// `CxPlatWorkerPoolAddRef`/`Release` are paired.
    pub fn release(&self, reference: WorkerPoolRef) {
        drop(reference);
    }

    /// Returns a snapshot of a worker's debug counters.
    pub fn stats(&self, processor_index: usize) -> Option<WorkerStats> {
        let worker = self.workers.get(processor_index)?;
        let s = &worker.shared.stats;
        Some(WorkerStats {
            loop_count: s.loop_count.load(Ordering::Relaxed),
            ec_poll_count: s.ec_poll_count.load(Ordering::Relaxed),
            ec_run_count: s.ec_run_count.load(Ordering::Relaxed),
            cqe_count: s.cqe_count.load(Ordering::Relaxed),
        })
    }

    /// Signals every worker to stop, waits for outstanding references
    /// (`add_execution_context` callers racing shutdown) to drain, then
    /// joins all threads.
    pub fn shutdown(mut self) {
        self.rundown.run_down();
        for worker in &self.workers {
            worker.shared.shutdown.store(true, Ordering::Release);
            let _ = worker.shared.wake_tx.send(());
        }
        for worker in self.workers.drain(..) {
            let _ = worker.thread.join();
        }
    }
}

/// Runs one pass over `contexts`, polling whichever are ready or due.
/// Called twice in a row around the pre-wait `running` clear below, so it's
/// pulled out rather than inlined (see `run_worker`).
fn run_ready_contexts(shared: &Arc<Shared>, contexts: &mut Vec<OwnedContext>) -> (bool, Option<Instant>) {
    let now = Instant::now();
    let mut did_work = false;
    let mut next_wake: Option<Instant> = None;
    contexts.retain_mut(|owned| {
        if cfg!(debug_assertions) {
            shared.stats.ec_poll_count.fetch_add(1, Ordering::Relaxed);
        }
        let due = owned.ctx.next_time().is_some_and(|t| t <= now);
        let ready = owned.ready.swap(false, Ordering::AcqRel);
        if !ready && !due {
            if let Some(t) = owned.ctx.next_time() {
                next_wake = Some(next_wake.map_or(t, |n| n.min(t)));
            }
            return true;
        }
        did_work = true;
        if cfg!(debug_assertions) {
            shared.stats.ec_run_count.fetch_add(1, Ordering::Relaxed);
        }
        let keep = owned.ctx.poll(now);
        if keep {
            if let Some(t) = owned.ctx.next_time() {
                next_wake = Some(next_wake.map_or(t, |n| n.min(t)));
            }
        }
        keep
    });
    (did_work, next_wake)
}

fn run_worker(shared: &Arc<Shared>, wake_rx: mpsc::Receiver<()>) {
    let mut contexts: Vec<OwnedContext> = Vec::new();
    let mut pools: Vec<Arc<dyn DynamicPool>> = Vec::new();
    let mut idle_iterations: u32 = 0;
    let mut last_prune = Instant::now();

    loop {
        shared.running.store(true, Ordering::Release);

        {
            let mut pending = shared.pending_contexts.lock().unwrap();
            contexts.extend(pending.drain(..));
        }
        {
            let mut pending = shared.pending_pools.lock().unwrap();
            pools.extend(pending.drain(..));
        }
        {
            let mut removals = shared.pending_pool_removals.lock().unwrap();
            if !removals.is_empty() {
                pools.retain(|p| !removals.iter().any(|r| Arc::ptr_eq(p, r)));
                removals.clear();
            }
        }

        if cfg!(debug_assertions) {
            shared.stats.loop_count.fetch_add(1, Ordering::Relaxed);
        }

        let (mut did_work, mut next_wake) = run_ready_contexts(shared, &mut contexts);

        if last_prune.elapsed() >= POOL_PRUNE_PERIOD {
            for pool in &pools {
                pool.prune(POOL_PRUNE_COUNT);
            }
            last_prune = Instant::now();
            did_work = true;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            let _ = shared.event_queue.lock().unwrap().submit_shutdown();
            return;
        }

        if did_work {
            idle_iterations = 0;
        } else {
            idle_iterations += 1;
        }

        // drain and account for whatever the event queue already completed.
        match shared.event_queue.lock().unwrap().try_poll() {
            Ok(tags) => {
                if cfg!(debug_assertions) {
                    shared.stats.cqe_count.fetch_add(tags.len() as u64, Ordering::Relaxed);
                }
                if tags.contains(&TAG_SHUTDOWN) {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "worker event queue poll failed"),
        }

        let timeout = next_wake
            .map(|t| t.saturating_duration_since(Instant::now()))
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT);

        // about to actually wait: atomically clear `running` so a waker
        // racing this point starts enqueueing wakes again, then check
        // whether that clear's *old* value was still `true` -- if so, a
        // context may have gone ready between the scan above and this
        // clear while a concurrent waker still saw `running == true` and
        // skipped its own wake SQE, so scan once more before blocking
        // rather than risk missing it until `MAX_WAIT` expires. Mirrors
        // `CxPlatWorkerThread`'s `InterlockedFetchAndClearBoolean` dance.
        if timeout > Duration::ZERO && shared.running.swap(false, Ordering::AcqRel) {
            let (more_work, _) = run_ready_contexts(shared, &mut contexts);
            if more_work {
                did_work = true;
                idle_iterations = 0;
            }
        }

        let _ = wake_rx.recv_timeout(timeout);
        shared.running.store(true, Ordering::Release);

        if idle_iterations >= IDLE_YIELD_THRESHOLD {
            std::thread::yield_now();
        }

        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}

/// Pins the calling thread to `processor`. Mirrors `CxPlatThreadCreate`'s
/// `IdealProcessor` hint in `platform_worker.c`, applied from inside the
/// thread rather than at spawn time since `std::thread` offers no
/// pre-spawn affinity hook. Best-effort: an unsupported or failing
/// affinity call is logged, not fatal to the worker.
#[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
fn affinitize_current_thread(processor: u32) {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_SET(processor as usize, &mut set);
        if libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            tracing::warn!(processor, error = %std::io::Error::last_os_error(), "failed to set worker thread affinity");
        }
    }
    #[cfg(not(target_os = "linux"))]
    tracing::debug!(processor, "ideal-processor affinity is unsupported on this platform");
}
