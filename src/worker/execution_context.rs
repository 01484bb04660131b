// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A unit of cooperative work a [`super::WorkerPool`] runs to completion one
/// slice at a time. Implementors are polled from whichever worker thread
/// owns them; `poll` must not block.
pub trait ExecutionContext: Send {
    /// Runs one slice of work. Returning `false` removes this context from
    /// its worker permanently.
    fn poll(&mut self, now: Instant) -> bool;

    /// The earliest time this context should run again even without an
    /// explicit wake, e.g. a retransmission timer. `None` means "only run
    /// me when woken".
    fn next_time(&self) -> Option<Instant> {
        None
    }
}

/// A cloneable handle that lets any thread mark an [`ExecutionContext`]
/// ready to run and, the first time it does so since the context's worker
/// last went looking, ask that worker to wake up.
///
/// Mirrors `CxPlatWakeExecutionContext`'s use of an atomic fetch-and-set on
/// both `ready` and `worker_running`: a wake-queue submission is only ever
/// enqueued on the `false -> true` edge of each, so concurrent wakers
/// racing each other and the worker coalesce into a single wakeup instead
/// of one event per waker.
#[derive(Clone)]
pub struct WakeHandle {
    ready: Arc<AtomicBool>,
    pub(super) worker_running: Arc<AtomicBool>,
    pub(super) wake: std::sync::mpsc::Sender<()>,
}

impl WakeHandle {
    pub(super) fn new(
        ready: Arc<AtomicBool>,
        worker_running: Arc<AtomicBool>,
        wake: std::sync::mpsc::Sender<()>,
    ) -> Self {
        Self {
            ready,
            worker_running,
            wake,
        }
    }

    /// Marks the context ready and, if the owning worker isn't already
    /// awake processing events, asks it to wake up.
    pub fn wake(&self) {
        if self.ready.swap(true, Ordering::AcqRel) {
            // already ready; the worker hasn't consumed the last wake yet.
            return;
        }
        // `InterlockedFetchAndSetBoolean(&Worker->Running)`: the send must
        // be gated on the same read-modify-write that claims the
        // false -> true transition, not a separate load, or two concurrent
        // wakers can both observe "not running" and both enqueue.
        if !self.worker_running.swap(true, Ordering::AcqRel) {
            let _ = self.wake.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn wake_only_signals_once_between_consumes() {
        let ready = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let handle = WakeHandle::new(ready.clone(), running, tx);

        handle.wake();
        handle.wake();
        assert!(ready.load(Ordering::Acquire));
        assert_eq!(rx.try_recv().is_ok(), true);
        assert!(rx.try_recv().is_err(), "second wake should have been coalesced");
    }

    #[test]
    fn wake_is_suppressed_while_worker_is_running() {
        let ready = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let handle = WakeHandle::new(ready, running, tx);

        handle.wake();
        assert!(rx.try_recv().is_err());
    }

    /// The running-flag coalescing must be its own atomic transition, not a
    /// load racing a separate store: a second wake arriving after the
    /// worker consumes `ready` but before it clears `running` must not
    /// double-send.
    #[test]
    fn wake_coalesces_via_running_flag_independent_of_ready() {
        let ready = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let handle = WakeHandle::new(ready.clone(), running, tx);

        handle.wake();
        assert!(rx.try_recv().is_ok());

        // the worker consumed `ready` but hasn't cleared `running` yet.
        ready.store(false, Ordering::Release);
        handle.wake();
        assert!(rx.try_recv().is_err(), "wake while still running should not resend");
    }
}
