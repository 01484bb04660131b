// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{DynamicPool, ExecutionConfig, ExecutionContext, WorkerPool};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CountingContext {
    runs: Arc<AtomicUsize>,
    stop_after: usize,
}

impl ExecutionContext for CountingContext {
    fn poll(&mut self, _now: Instant) -> bool {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        n < self.stop_after
    }
}

#[test]
fn execution_context_runs_until_it_asks_to_be_removed() {
    let pool = WorkerPool::create(&ExecutionConfig::new(1)).expect("io_uring available in test environment");
    let runs = Arc::new(AtomicUsize::new(0));
    let handle = pool
        .add_execution_context(
            0,
            Box::new(CountingContext {
                runs: runs.clone(),
                stop_after: 3,
            }),
        )
        .unwrap();

    // the context starts ready, so the worker should run it immediately;
    // keep nudging it awake until it has removed itself.
    for _ in 0..50 {
        if runs.load(Ordering::SeqCst) >= 3 {
            break;
        }
        handle.wake();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    pool.shutdown();
}

struct PruneCounter {
    calls: AtomicU32,
}

impl DynamicPool for PruneCounter {
    fn prune(&self, _count: usize) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst);
        0
    }
}

#[test]
fn dynamic_pool_registration_does_not_error() {
    let pool = WorkerPool::create(&ExecutionConfig::new(1)).expect("io_uring available in test environment");
    let counter = Arc::new(PruneCounter {
        calls: AtomicU32::new(0),
    });
    pool.add_dynamic_pool(0, counter).unwrap();
    pool.shutdown();
}

#[test]
fn invalid_processor_index_is_rejected() {
    let pool = WorkerPool::create(&ExecutionConfig::new(1)).expect("io_uring available in test environment");
    let runs = Arc::new(AtomicUsize::new(0));
    let err = pool.add_execution_context(
        5,
        Box::new(CountingContext {
            runs,
            stop_after: 1,
        }),
    );
    assert!(err.is_err());
    pool.shutdown();
}
