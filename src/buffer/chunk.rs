// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Chunk storage and the read views handed back to callers.
//!
//! A [`Chunk`] is one physical allocation backing some span of the stream.
//! In `single`/`circular` mode there is exactly one, reused via wraparound;
//! in `multiple`/`app_owned` mode there is one per non-contiguous write.
//!
//! [`ReadBuf`] is a view into a chunk's bytes, handed out by `read()` and
//! released by a later `drain()`. The buffer's own bookkeeping (the
//! `external_reference` flag plus the `read_start`/`read_length` cursors in
//! `reassembly.rs`) guarantees that the span a `ReadBuf` points at is never
//! concurrently written to, so an outstanding `ReadBuf` can safely coexist
//! with further writes into the *rest* of a circular chunk. Rust's borrow
//! checker can't see that non-overlap on its own -- it only sees one
//! allocation mutably reachable from two places -- so chunk storage is
//! `Rc<UnsafeCell<_>>` and the slice access in `Deref` is unsafe, gated on
//! that invariant rather than on the type system.

use alloc::{boxed::Box, rc::Rc};
use core::cell::UnsafeCell;

pub(super) type Storage = Rc<UnsafeCell<Box<[u8]>>>;

/// One physical allocation backing a span of the stream.
pub(super) struct Chunk {
    storage: Storage,
    /// Length of `storage`, a power of two except in `app_owned` mode.
    pub alloc_length: u32,
    /// Set while a [`ReadBuf`] into this chunk has been handed out and not
    /// yet released by `drain`. While set, the chunk must not be resized or
    /// freed (mirrors `QUIC_RECV_CHUNK::ExternalReference`).
    pub external_reference: bool,
    /// `true` if this chunk's memory was supplied by the caller via
    /// `provide_chunks` rather than allocated internally; such chunks are
    /// returned to the caller on drain instead of freed.
    pub app_owned: bool,
}

impl Chunk {
    pub fn new(storage: Box<[u8]>, app_owned: bool) -> Self {
        let alloc_length = storage.len() as u32;
        Self {
            storage: Rc::new(UnsafeCell::new(storage)),
            alloc_length,
            external_reference: false,
            app_owned,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.alloc_length as usize
    }

    /// Writes `data` at byte offset `at` within this chunk's storage. Must
    /// not be called while `at..at + data.len()` overlaps any span handed
    /// out via an outstanding `ReadBuf` (`external_reference` covers the
    /// whole chunk conservatively; `reassembly.rs` never writes behind the
    /// current `read_start` cursor, so in practice the spans never touch).
    #[inline]
    pub fn write_at(&self, at: usize, data: &[u8]) {
        // SAFETY: `storage` is only ever aliased by `ReadBuf`s produced from
        // disjoint, already-written byte ranges (see module docs); this
        // write targets unwritten bytes tracked separately by the caller.
        let slice = unsafe { &mut *self.storage.get() };
        slice[at..at + data.len()].copy_from_slice(data);
    }

    /// Shifts the trailing `alloc_length - amount` bytes down to offset 0,
    /// discarding the leading `amount` bytes. Used by `single` mode's drain,
    /// which keeps the live window at the front of its one chunk instead of
    /// rotating a `read_start` cursor.
    #[inline]
    pub fn shift_left(&self, amount: usize) {
        // SAFETY: see the module-level invariant; single mode never hands
        // out a `ReadBuf` that survives past the drain call that shifts it.
        let slice = unsafe { &mut *self.storage.get() };
        slice.copy_within(amount.., 0);
    }

    #[inline]
    pub fn read_buf(&self, at: usize, length: usize) -> ReadBuf {
        ReadBuf {
            storage: self.storage.clone(),
            offset: at,
            length,
        }
    }

    /// Reclaims the backing storage, for handing an `app_owned` chunk back
    /// to the caller once fully drained.
    pub fn into_storage(self) -> Box<[u8]> {
        match Rc::try_unwrap(self.storage) {
            Ok(cell) => cell.into_inner(),
            Err(rc) => {
                // an outstanding `ReadBuf` the caller never dropped is still
                // aliasing this storage; hand back a copy rather than the
                // original allocation.
                let slice = unsafe { &*rc.get() };
                slice.to_vec().into_boxed_slice()
            }
        }
    }
}

/// A read-only view into a byte span of a [`Chunk`].
///
/// Obtained from [`super::ReassemblyBuffer::read`] and released by
/// [`super::ReassemblyBuffer::drain`]. The `Deref` impl exposes the bytes;
/// nothing else about a `ReadBuf` is public.
pub struct ReadBuf {
    storage: Storage,
    offset: usize,
    length: usize,
}

impl core::ops::Deref for ReadBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see the module-level invariant: the byte range
        // `offset..offset + length` was already written and is not mutated
        // again until the corresponding `drain` call clears the chunk's
        // `external_reference` flag, after which this `ReadBuf` is gone.
        let slice = unsafe { &*self.storage.get() };
        &slice[self.offset..self.offset + self.length]
    }
}

impl core::fmt::Debug for ReadBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ReadBuf")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}
