// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A thin wrapper around an `io_uring` ring used purely as this worker's
//! wake/shutdown/poll-update signaling channel -- no file or socket I/O goes
//! through it, that belongs to whatever embeds this crate.

use io_uring::{opcode, squeue::Entry, types, IoUring};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const QUEUE_DEPTH: u32 = 32;
const MAX_CQES_PER_POLL: usize = 16;

/// SQE/CQE user-data tag for a shutdown completion, one of the three
/// completion kinds `platform_worker.c` dispatches on
/// (`CXPLAT_SQE_TYPE_SHUTDOWN` / `_WAKE` / `_UPDATE_POLL`); the latter two
/// are handled by the worker's wake channel here instead (see `pool.rs`).
pub(super) const TAG_SHUTDOWN: u64 = 1;

pub(super) struct EventQueue {
    ring: IoUring,
}

impl EventQueue {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            ring: IoUring::new(QUEUE_DEPTH)?,
        })
    }

    fn push_nop(&mut self, tag: u64) -> io::Result<()> {
        let sqe = opcode::Nop::new().build().user_data(tag);
        self.submit(&sqe)
    }

    /// Submits a single caller-provided SQE and returns immediately;
    /// completions surface through `try_poll`'s tags like any other
    /// submission. This is the path real I/O (socket reads/writes, timers)
    /// an embedder owns takes onto this worker's ring, alongside the
    /// wake/shutdown/poll-update SQEs the worker submits to itself.
    pub fn submit(&mut self, sqe: &Entry) -> io::Result<()> {
        unsafe {
            self.ring
                .submission()
                .push(sqe)
                .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "worker event queue is full"))?;
        }
        self.ring.submit()?;
        Ok(())
    }

    pub fn submit_shutdown(&mut self) -> io::Result<()> {
        self.push_nop(TAG_SHUTDOWN)
    }

    /// Submits any queued SQEs and drains whatever completions are already
    /// available, without blocking. Used once per worker loop iteration for
    /// the debug CQE counter; the worker's actual sleep uses its wake
    /// channel rather than blocking in the ring (see `pool.rs`).
    pub fn try_poll(&mut self) -> io::Result<Vec<u64>> {
        self.ring.submit()?;
        let tags = self
            .ring
            .completion()
            .take(MAX_CQES_PER_POLL)
            .map(|cqe| cqe.user_data())
            .collect();
        Ok(tags)
    }

    /// Waits up to `timeout` (or indefinitely, if `None`) for at least one
    /// completion, then drains up to `MAX_CQES_PER_POLL` tags -- the bounded
    /// per-iteration CQE batch `CxPlatProcessEvents` uses.
    #[cfg(test)]
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<u64>> {
        match timeout {
            Some(timeout) => {
                let ts = types::Timespec::new()
                    .sec(timeout.as_secs())
                    .nsec(timeout.subsec_nanos());
                let args = types::SubmitArgs::new().timespec(&ts);
                if let Err(e) = self.ring.submitter().submit_with_args(1, &args) {
                    if e.raw_os_error() != Some(libc::ETIME) {
                        return Err(e);
                    }
                }
            }
            None => {
                self.ring.submit_and_wait(1)?;
            }
        }

        let tags = self
            .ring
            .completion()
            .take(MAX_CQES_PER_POLL)
            .map(|cqe| cqe.user_data())
            .collect();
        Ok(tags)
    }
}

/// A cloneable handle to one worker's event queue, returned by
/// [`super::WorkerPool::get_event_queue`]. Lets an embedder submit its own
/// I/O onto the same ring the owning worker already polls every loop
/// iteration instead of maintaining a separate one per processor.
#[derive(Clone)]
pub struct EventQueueHandle(pub(super) Arc<Mutex<EventQueue>>);

impl EventQueueHandle {
    /// Submits a single SQE onto the worker's ring. Mirrors
    /// `CxPlatEventQEnqueue` called from outside the worker thread.
    pub fn submit(&self, sqe: &Entry) -> io::Result<()> {
        self.0.lock().unwrap().submit(sqe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_tag_round_trips() {
        let mut queue = EventQueue::new().expect("io_uring available in test environment");
        queue.submit_shutdown().unwrap();
        let tags = queue.poll(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(tags, vec![TAG_SHUTDOWN]);
    }
}
