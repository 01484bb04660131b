// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The reassembly state machine: `write`, `read`, `drain`, `resize`, and the
//! bookkeeping that ties a mode's physical chunk layout to the logical
//! stream offset space.

use crate::buffer::{
    chunk::{Chunk, ReadBuf},
    written_ranges::WrittenRanges,
    Error, Result,
};
use alloc::{boxed::Box, collections::VecDeque, vec, vec::Vec};

/// Selects how a [`ReassemblyBuffer`] lays out physical storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One fixed-size chunk, growable by a single reallocation; only one
    /// outstanding read at a time.
    Single,
    /// One chunk used as a ring buffer; supports out-of-order writes within
    /// the window and growth by reallocation.
    Circular,
    /// Independently allocated chunks, one per non-contiguous write region;
    /// supports multiple concurrently outstanding reads. The first chunk is
    /// itself a ring buffer until a second chunk is appended.
    Multiple,
    /// Like `Multiple`, but chunk storage is supplied by the caller via
    /// [`ReassemblyBuffer::provide_chunks`] rather than allocated here.
    AppOwned,
}

impl Mode {
    /// Whether this mode ever grows its own storage via [`ReassemblyBuffer::resize`].
    /// `app_owned` never does: its capacity comes entirely from `provide_chunks`.
    #[inline]
    fn resizes(self) -> bool {
        !matches!(self, Mode::AppOwned)
    }
}

/// The result of a successful [`ReassemblyBuffer::read`] call: the absolute
/// stream offset the data starts at, and the (one or more) spans of bytes
/// making it up.
pub struct ReadRequest {
    pub offset: u64,
    pub buffers: Vec<ReadBuf>,
}

/// The result of a [`ReassemblyBuffer::drain`] call.
pub struct DrainOutcome {
    /// `true` if every byte previously returned by `read` has now been
    /// drained and nothing further is immediately readable; `false` if a
    /// contiguous remainder is still pending (a partial drain).
    pub fully_drained: bool,
    /// `app_owned` chunks that were fully drained and are now handed back to
    /// the caller. Empty outside `app_owned` mode.
    pub returned_chunks: Vec<Box<[u8]>>,
}

/// Reassembles out-of-order stream writes into a contiguous, readable
/// window. See `SPEC_FULL.md` §4 for the per-mode contract this implements.
pub struct ReassemblyBuffer {
    mode: Mode,
    chunks: VecDeque<Chunk>,
    base_offset: u64,
    virtual_buffer_length: u64,
    written_ranges: WrittenRanges,
    /// Usable bytes of the first chunk. Equal to that chunk's `alloc_length`
    /// in `single`/`circular` mode and while `multiple` mode has only one
    /// chunk (both treat it as one big ring); once `multiple`/`app_owned`
    /// have more than one chunk, this shrinks as the first chunk's front is
    /// drained, independently of its physical `alloc_length`.
    capacity: u32,
    /// Physical index in the first chunk that corresponds to `base_offset`.
    read_start: u32,
    /// Bytes contiguously readable from the first chunk at `read_start`
    /// before falling off its capacity/end, recomputed on every write and
    /// drain. Subsequent chunks (`multiple`/`app_owned`) are always read
    /// from their own offset zero, so they don't need their own cursor.
    read_length: u32,
    /// Bytes already handed out via `read` and not yet released by `drain`.
    /// Only `multiple` mode ever has more than one chunk's worth pending at
    /// once; every other mode's single outstanding read is fully released
    /// the moment `drain` is called at all, partial or not.
    read_pending_length: u64,
}

impl ReassemblyBuffer {
    /// Allocates a fresh buffer. `alloc_length` must be a power of two for
    /// every mode except `AppOwned`, which takes its storage from
    /// `provide_chunks` instead and ignores `alloc_length` (pass `0`).
    pub fn initialize(mode: Mode, alloc_length: u32, virtual_buffer_length: u64) -> Result<Self> {
        let mut buf = Self {
            mode,
            chunks: VecDeque::new(),
            base_offset: 0,
            virtual_buffer_length,
            written_ranges: WrittenRanges::new(),
            capacity: 0,
            read_start: 0,
            read_length: 0,
            read_pending_length: 0,
        };

        if mode == Mode::AppOwned {
            return Ok(buf);
        }

        if alloc_length == 0 || !alloc_length.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        if (alloc_length as u64) > virtual_buffer_length {
            return Err(Error::InvalidParameter);
        }

        let storage = zeroed(alloc_length as usize)?;
        buf.chunks.push_back(Chunk::new(storage, false));
        buf.capacity = alloc_length;
        Ok(buf)
    }

    /// Supplies externally-owned storage to an `AppOwned` buffer. Each chunk
    /// extends the buffer's write budget (`virtual_buffer_length`)
    /// contiguously; callers typically invoke this once up front and again
    /// whenever they hand back a drained chunk.
    pub fn provide_chunks(&mut self, chunks: impl IntoIterator<Item = Box<[u8]>>) -> Result<()> {
        if self.mode != Mode::AppOwned {
            return Err(Error::InvalidParameter);
        }
        for storage in chunks {
            if storage.is_empty() {
                return Err(Error::InvalidParameter);
            }
            if self.chunks.is_empty() {
                debug_assert_eq!(self.read_start, 0);
                debug_assert_eq!(self.read_length, 0);
                self.capacity = storage.len() as u32;
            }
            self.virtual_buffer_length += storage.len() as u64;
            self.chunks.push_back(Chunk::new(storage, true));
        }
        Ok(())
    }

    /// Raises (never lowers) the advertised flow-control window. Feeding the
    /// caller's window-advertisement policy back into the buffer is out of
    /// scope here; this just records the new ceiling `write` checks against.
    pub fn increase_virtual_buffer_length(&mut self, new_length: u64) {
        debug_assert!(
            new_length >= self.virtual_buffer_length,
            "virtual buffer length must not shrink"
        );
        self.virtual_buffer_length = new_length;
    }

    #[inline]
    fn total_length(&self) -> u64 {
        self.written_ranges.max_safe().map_or(self.base_offset, |m| m + 1)
    }

    /// The minimum contiguous allocation needed to hold everything currently
    /// tracked, gaps included.
    #[inline]
    fn span(&self) -> u64 {
        self.total_length() - self.base_offset
    }

    /// Bytes contiguously written from the very start of the stream, minus
    /// what's already behind `base_offset` -- i.e. immediately readable
    /// (modulo what's already been handed out). The first tracked range's
    /// `low` is always `0`: writes below `base_offset` are trimmed before
    /// reaching `written_ranges` (see `write`), so the only way a gap can
    /// exist is further out, never at the very front.
    #[inline]
    fn contiguous_length(&self) -> u64 {
        match self.written_ranges.get_safe(0) {
            Some(r) if r.low == 0 => r.high().saturating_sub(self.base_offset),
            _ => 0,
        }
    }

    pub(crate) fn total_alloc_length(&self) -> u64 {
        match self.mode {
            Mode::Single | Mode::Circular => self.chunks.back().map_or(0, |c| c.alloc_length as u64),
            Mode::Multiple if self.chunks.len() <= 1 => self.chunks.front().map_or(0, |c| c.alloc_length as u64),
            Mode::Multiple | Mode::AppOwned => {
                self.capacity as u64 + self.chunks.iter().skip(1).map(|c| c.alloc_length as u64).sum::<u64>()
            }
        }
    }

    /// Writes `data` at absolute stream offset `offset`.
    ///
    /// `write_limit` bounds how many bytes beyond what's already tracked
    /// (i.e. beyond [`Self::total_length`]) this call may admit -- the
    /// caller's own connection-wide flow-control credit, which this buffer
    /// doesn't itself track. On entry it's the remaining credit; on return
    /// (success or not) it's overwritten with how many *new* bytes this
    /// call actually consumed, so the caller can debit its own budget.
    /// Returns whether the stream is now readable from offset zero.
    pub fn write(&mut self, offset: u64, data: &[u8], write_limit: &mut u64) -> Result<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        if data.len() > u16::MAX as usize {
            return Err(Error::InvalidParameter);
        }
        let length = data.len() as u64;
        let end = offset.checked_add(length).ok_or(Error::InvalidParameter)?;

        // entirely a retransmission of bytes already drained past.
        if end <= self.base_offset {
            *write_limit = 0;
            return Ok(false);
        }
        if end > self.base_offset + self.virtual_buffer_length {
            return Err(Error::BufferTooSmall);
        }

        // trim the leading bytes that straddle the drained watermark; the
        // rest proceeds as an ordinary write of the still-relevant tail.
        let (offset, data) = if offset < self.base_offset {
            let trim = (self.base_offset - offset) as usize;
            (self.base_offset, &data[trim..])
        } else {
            (offset, data)
        };
        let length = data.len() as u64;

        let current_max = self.total_length();
        let new_bytes_admitted = end.saturating_sub(current_max);
        if new_bytes_admitted > *write_limit {
            return Err(Error::BufferTooSmall);
        }
        *write_limit = new_bytes_admitted;

        let new_total = current_max.max(end);
        let required_span = new_total - self.base_offset;
        if required_span > self.total_alloc_length() {
            // app_owned mode never allocates its own storage -- the caller
            // must have already handed over enough chunks via
            // `provide_chunks` to cover the virtual window.
            if !self.mode.resizes() {
                return Err(Error::BufferTooSmall);
            }
            self.resize(next_power_of_two(required_span))?;
        }

        if !self.written_ranges.add_range(offset, length) {
            // the range set already fully covered this span: nothing new to
            // copy, and readiness can't have changed.
            return Ok(false);
        }

        let ready_to_read = self.written_ranges.get_safe(0).is_some_and(|r| r.low == 0);
        self.copy_into_chunks(offset, data);
        Ok(ready_to_read)
    }

    fn copy_into_chunks(&mut self, offset: u64, data: &[u8]) {
        if matches!(self.mode, Mode::Single | Mode::Circular) {
            let chunk = self.chunks.front().expect("single/circular mode always has one chunk");
            let alloc_length = chunk.alloc_length;
            let rel = (offset - self.base_offset) as u32;
            let physical = (self.read_start.wrapping_add(rel)) % alloc_length;
            let first_len = (alloc_length - physical).min(data.len() as u32) as usize;
            chunk.write_at(physical as usize, &data[..first_len]);
            if first_len < data.len() {
                chunk.write_at(0, &data[first_len..]);
            }
            self.read_length = self.contiguous_length() as u32;
            return;
        }

        self.copy_into_disjoint_chunks(offset, data);
    }

    /// `Multiple`/`AppOwned`: finds the chunk(s) covering
    /// `offset..offset + data.len()`. `Multiple` with a single chunk is a
    /// ring buffer over that chunk's full `alloc_length`, identical to
    /// `circular`; once a second chunk exists (or in `app_owned` mode
    /// always), only the first chunk is ring-addressed over `capacity` and
    /// every later chunk is a plain linear allocation starting at offset 0.
    fn copy_into_disjoint_chunks(&mut self, offset: u64, data: &[u8]) {
        let single_chunk_multiple = self.mode == Mode::Multiple && self.chunks.len() == 1;
        let mut relative_offset = offset - self.base_offset;
        let mut idx = 0usize;
        let mut is_first_chunk = true;
        let mut chunk_length;

        if single_chunk_multiple {
            chunk_length = self.chunks[0].alloc_length;
            self.read_length = self.contiguous_length() as u32;
        } else {
            chunk_length = self.capacity;
            if relative_offset < self.capacity as u64 {
                let contiguous = self.contiguous_length() as u32;
                self.read_length = contiguous.min(self.capacity);
            } else {
                while (chunk_length as u64) <= relative_offset {
                    relative_offset -= chunk_length as u64;
                    is_first_chunk = false;
                    idx += 1;
                    chunk_length = self.chunks[idx].alloc_length;
                }
            }
        }

        let mut write_offset_in_data = 0usize;
        let mut remaining = data.len() as u32;
        let mut is_first_loop = true;

        loop {
            let alloc_length = self.chunks[idx].alloc_length;
            let mut chunk_write_offset = if !is_first_loop {
                0
            } else if !is_first_chunk {
                relative_offset as u32
            } else {
                (self.read_start.wrapping_add(relative_offset as u32)) % alloc_length
            };

            let mut chunk_write_length = remaining;
            if is_first_chunk {
                let first_chunk_capacity = if single_chunk_multiple { alloc_length } else { self.capacity };
                if (first_chunk_capacity as u64) < relative_offset + chunk_write_length as u64 {
                    chunk_write_length = first_chunk_capacity - relative_offset as u32;
                }
                if alloc_length < chunk_write_offset + chunk_write_length {
                    let part1 = alloc_length - chunk_write_offset;
                    self.chunks[idx].write_at(
                        chunk_write_offset as usize,
                        &data[write_offset_in_data..write_offset_in_data + part1 as usize],
                    );
                    self.chunks[idx].write_at(
                        0,
                        &data[write_offset_in_data + part1 as usize..write_offset_in_data + chunk_write_length as usize],
                    );
                } else {
                    self.chunks[idx].write_at(
                        chunk_write_offset as usize,
                        &data[write_offset_in_data..write_offset_in_data + chunk_write_length as usize],
                    );
                }
            } else {
                if chunk_write_offset as u64 + chunk_write_length as u64 >= chunk_length as u64 {
                    chunk_write_length = chunk_length - chunk_write_offset;
                }
                self.chunks[idx].write_at(
                    chunk_write_offset as usize,
                    &data[write_offset_in_data..write_offset_in_data + chunk_write_length as usize],
                );
            }

            if remaining == chunk_write_length {
                break;
            }
            write_offset_in_data += chunk_write_length as usize;
            remaining -= chunk_write_length;
            idx += 1;
            chunk_length = self.chunks[idx].alloc_length;
            is_first_chunk = false;
            is_first_loop = false;
        }
    }

    /// Grows storage to `new_alloc_length`, per §4.5's three cases. Any
    /// [`ReadBuf`]s already handed out from a chunk this replaces remain
    /// valid: they hold their own `Rc` to the old storage, so replacing
    /// `self.chunks`'s entry doesn't invalidate them. This replaces
    /// `recv_buffer.c`'s explicit `RetiredChunk` bookkeeping, which existed
    /// only to keep that old memory alive in C.
    fn resize(&mut self, new_alloc_length: u32) -> Result<()> {
        debug_assert!(new_alloc_length.is_power_of_two());
        let last_idx = self.chunks.len() - 1;
        let last_chunk_is_first = last_idx == 0;
        let old_alloc_length = self.chunks[last_idx].alloc_length;
        debug_assert!(new_alloc_length > old_alloc_length);

        let new_storage = zeroed(new_alloc_length as usize)?;
        let new_chunk = Chunk::new(new_storage, false);

        // whichever branch below runs, a chunk not externally referenced is
        // the one that's always replaced/merged; the only thing that
        // changes is how (and whether) its live bytes get copied forward.
        if !self.chunks[last_idx].external_reference {
            if last_chunk_is_first {
                let mut span = self.span();
                if span < old_alloc_length as u64 {
                    span = old_alloc_length as u64;
                }
                wrap_copy(&new_chunk, &self.chunks[last_idx], self.read_start, span as u32);
                self.read_start = 0;
                self.capacity = new_alloc_length;
            } else {
                // not the first chunk: it always starts from the beginning.
                let live = self.chunks[last_idx].read_buf(0, old_alloc_length as usize);
                new_chunk.write_at(0, &live);
            }
            self.chunks.pop_back();
            self.chunks.push_back(new_chunk);
            return Ok(());
        }

        // the chunk is externally referenced (an outstanding read covers
        // it). In `multiple` mode we can simply append the bigger chunk and
        // leave the old one for its drain to free; any other resizing mode
        // only ever has one chunk, so it must copy forward and retire the
        // old chunk's memory (kept alive here via its `Rc`, not a dedicated
        // retired-chunk slot).
        if self.mode == Mode::Multiple {
            self.chunks.push_back(new_chunk);
            return Ok(());
        }

        let span = self.span();
        wrap_copy(&new_chunk, &self.chunks[last_idx], self.read_start, span as u32);
        self.read_start = 0;
        self.capacity = new_alloc_length;
        self.chunks.pop_back();
        self.chunks.push_back(new_chunk);
        Ok(())
    }

    /// How many [`ReadBuf`] spans a caller preallocating a fixed-size buffer
    /// array would need: a fixed per-mode upper bound for every mode except
    /// `app_owned`, whose chunk count is dynamic.
    pub fn buffers_needed(&self) -> usize {
        match self.mode {
            Mode::Single => 1,
            Mode::Circular => 2,
            Mode::Multiple => 3,
            Mode::AppOwned => {
                let readable = match self.written_ranges.get_safe(0) {
                    Some(r) => r.high().saturating_sub(self.base_offset),
                    None => return 0,
                };
                let mut data_in_chunks = self.capacity as u64;
                let mut count = 1;
                let mut idx = 1;
                while readable > data_in_chunks {
                    data_in_chunks += self.chunks[idx].alloc_length as u64;
                    count += 1;
                    idx += 1;
                }
                count
            }
        }
    }

    /// Returns the next span of contiguous, not-yet-handed-out bytes, or
    /// `None` if there is nothing new to read.
    pub fn read(&mut self) -> Result<Option<ReadRequest>> {
        let contiguous = self.contiguous_length();
        if contiguous <= self.read_pending_length {
            return Ok(None);
        }

        match self.mode {
            Mode::Single => {
                debug_assert!(!self.chunks[0].external_reference);
                let offset = self.base_offset;
                self.read_pending_length += contiguous;
                self.chunks[0].external_reference = true;
                let buf = self.chunks[0].read_buf(0, contiguous as usize);
                Ok(Some(ReadRequest { offset, buffers: vec![buf] }))
            }
            Mode::Circular => {
                debug_assert!(!self.chunks[0].external_reference);
                let offset = self.base_offset;
                self.read_pending_length += contiguous;
                self.chunks[0].external_reference = true;
                let alloc_length = self.chunks[0].alloc_length;
                let start = self.read_start;
                let mut buffers = Vec::new();
                if start as u64 + contiguous > alloc_length as u64 {
                    let first_len = alloc_length - start;
                    buffers.push(self.chunks[0].read_buf(start as usize, first_len as usize));
                    buffers.push(self.chunks[0].read_buf(0, (contiguous - first_len as u64) as usize));
                } else {
                    buffers.push(self.chunks[0].read_buf(start as usize, contiguous as usize));
                }
                Ok(Some(ReadRequest { offset, buffers }))
            }
            Mode::Multiple => {
                let unread = contiguous - self.read_pending_length;
                let mut chunk_read_offset = self.read_pending_length;
                let mut idx = 0usize;
                let mut is_first_chunk = true;
                let mut chunk_read_length = self.read_length as u64;
                while chunk_read_length <= chunk_read_offset {
                    chunk_read_offset -= chunk_read_length;
                    is_first_chunk = false;
                    idx += 1;
                    chunk_read_length = self.chunks[idx].alloc_length as u64;
                }
                let mut chunk_read_length = (chunk_read_length - chunk_read_offset) as u32;
                let chunk_offset;
                if is_first_chunk {
                    chunk_offset =
                        (self.read_start.wrapping_add(chunk_read_offset as u32)) % self.chunks[idx].alloc_length;
                } else {
                    if chunk_read_length as u64 > unread {
                        chunk_read_length = unread as u32;
                    }
                    chunk_offset = chunk_read_offset as u32;
                }

                let alloc_length = self.chunks[idx].alloc_length;
                let mut buffers = Vec::new();
                if chunk_offset as u64 + chunk_read_length as u64 > alloc_length as u64 {
                    let first_len = alloc_length - chunk_offset;
                    buffers.push(self.chunks[idx].read_buf(chunk_offset as usize, first_len as usize));
                    buffers.push(self.chunks[idx].read_buf(0, (chunk_read_length - first_len) as usize));
                } else {
                    buffers.push(self.chunks[idx].read_buf(chunk_offset as usize, chunk_read_length as usize));
                }
                self.chunks[idx].external_reference = true;

                let remaining_unread = unread - chunk_read_length as u64;
                if remaining_unread > 0 {
                    idx += 1;
                    let take = remaining_unread.min(self.chunks[idx].alloc_length as u64) as u32;
                    buffers.push(self.chunks[idx].read_buf(0, take as usize));
                    self.chunks[idx].external_reference = true;
                }

                let offset = self.base_offset + self.read_pending_length;
                self.read_pending_length += unread;
                Ok(Some(ReadRequest { offset, buffers }))
            }
            Mode::AppOwned => {
                let mut remaining = contiguous;
                let mut buffers = Vec::new();
                self.chunks[0].external_reference = true;
                buffers.push(self.chunks[0].read_buf(self.read_start as usize, self.read_length as usize));
                remaining -= self.read_length as u64;

                let mut idx = 1;
                while remaining > 0 && idx < self.chunks.len() {
                    self.chunks[idx].external_reference = true;
                    let take = (self.chunks[idx].alloc_length as u64).min(remaining) as u32;
                    buffers.push(self.chunks[idx].read_buf(0, take as usize));
                    remaining -= take as u64;
                    idx += 1;
                }

                let offset = self.base_offset;
                self.read_pending_length = contiguous - remaining;
                Ok(Some(ReadRequest { offset, buffers }))
            }
        }
    }

    /// Releases `length` bytes previously returned by `read`. Returns
    /// whether everything readable has now been drained, plus any
    /// `app_owned` chunks fully drained by this call.
    pub fn drain(&mut self, length: u64) -> Result<DrainOutcome> {
        if length > self.read_pending_length {
            return Err(Error::InvalidParameter);
        }

        // outside `multiple` mode, a single outstanding read is entirely
        // released the moment any drain happens, partial or not; `multiple`
        // mode instead releases each chunk's reference as it's drained,
        // below.
        if self.mode != Mode::Multiple {
            for chunk in &mut self.chunks {
                chunk.external_reference = false;
            }
            self.read_pending_length = 0;
        }

        let mut drain_length = length;
        let mut returned_chunks = Vec::new();
        loop {
            let more_data_readable = self.read_length as u64 > drain_length;
            let first_range = self.written_ranges.get_safe(0);
            let gap_in_chunk = self.written_ranges.size() > 1
                && first_range.is_some_and(|r| self.base_offset + self.read_length as u64 == r.high());
            let mut partial_drain = more_data_readable || gap_in_chunk;
            match self.mode {
                Mode::Multiple => partial_drain &= (self.capacity as u64) > drain_length,
                Mode::AppOwned => partial_drain = (self.capacity as u64) > drain_length,
                _ => {}
            }

            if partial_drain {
                self.partial_drain(drain_length);
                return Ok(DrainOutcome {
                    fully_drained: !more_data_readable,
                    returned_chunks,
                });
            }

            drain_length = self.full_drain(drain_length, &mut returned_chunks);
            if drain_length == 0 {
                break;
            }
        }

        Ok(DrainOutcome {
            fully_drained: true,
            returned_chunks,
        })
    }

    /// Drains part of the first chunk, leaving it in place.
    fn partial_drain(&mut self, drain_length: u64) {
        self.base_offset += drain_length;
        if drain_length != 0 {
            if self.mode == Mode::Single {
                debug_assert_eq!(self.read_start, 0);
                self.chunks[0].shift_left(drain_length as usize);
            } else {
                let alloc_length = self.chunks[0].alloc_length;
                self.read_start = ((self.read_start as u64 + drain_length) % alloc_length as u64) as u32;
                if self.mode == Mode::AppOwned || self.chunks.len() > 1 {
                    self.capacity -= drain_length as u32;
                }
            }
            self.read_length -= drain_length as u32;
        }

        if self.mode == Mode::Multiple {
            self.chunks[0].external_reference = self.read_pending_length != drain_length;
            self.read_pending_length -= drain_length;
        } else if self.mode == Mode::AppOwned {
            self.virtual_buffer_length -= drain_length;
        }
    }

    /// Drains the entire first chunk (and possibly more, signaled by the
    /// returned nonzero remainder the caller must keep draining).
    fn full_drain(&mut self, mut drain_length: u64, returned_chunks: &mut Vec<Box<[u8]>>) -> u64 {
        drain_length -= self.read_length as u64;
        self.read_start = 0;
        self.base_offset += self.read_length as u64;
        if self.mode == Mode::Multiple {
            self.chunks[0].external_reference = false;
            self.read_pending_length -= self.read_length as u64;
        }
        if self.mode == Mode::AppOwned {
            self.virtual_buffer_length -= self.read_length as u64;
        }
        self.read_length = self.contiguous_length() as u32;

        if self.chunks.len() == 1 {
            debug_assert_eq!(drain_length, 0);
            if self.mode == Mode::AppOwned {
                let chunk = self.chunks.pop_front().expect("checked len == 1");
                returned_chunks.push(chunk.into_storage());
                self.capacity = 0;
            }
            return 0;
        }

        debug_assert!(matches!(self.mode, Mode::Multiple | Mode::AppOwned));
        let chunk = self.chunks.pop_front().expect("checked len > 1");
        if chunk.app_owned {
            returned_chunks.push(chunk.into_storage());
        }

        let next_alloc_length = self.chunks[0].alloc_length;
        self.capacity = next_alloc_length;
        if next_alloc_length < self.read_length {
            self.read_length = next_alloc_length;
        }
        drain_length
    }

    /// `Single` mode only: abandons an outstanding, undrained `read()`
    /// result without consuming it, so the next `read()` returns the same
    /// bytes again.
    pub fn reset_read(&mut self) -> Result<()> {
        if self.mode != Mode::Single {
            return Err(Error::InvalidParameter);
        }
        self.read_pending_length = 0;
        if let Some(chunk) = self.chunks.front_mut() {
            chunk.external_reference = false;
        }
        Ok(())
    }
}

/// Copies up to `span` bytes of `old`'s ring window, starting at physical
/// offset `read_start`, into `new` starting at offset 0 -- wrapping around
/// `old`'s end exactly once if the live window straddles it.
fn wrap_copy(new: &Chunk, old: &Chunk, read_start: u32, span: u32) {
    let length_till_wrap = old.alloc_length - read_start;
    if span <= length_till_wrap {
        let head = old.read_buf(read_start as usize, span as usize);
        new.write_at(0, &head);
    } else {
        let head = old.read_buf(read_start as usize, length_till_wrap as usize);
        new.write_at(0, &head);
        let tail = old.read_buf(0, (span - length_till_wrap) as usize);
        new.write_at(length_till_wrap as usize, &tail);
    }
}

fn next_power_of_two(n: u64) -> u32 {
    let n = n.max(1) as u32;
    n.next_power_of_two()
}

/// Allocates a zeroed buffer, failing with [`Error::OutOfMemory`] (rather
/// than aborting the process) if the allocator can't satisfy the request --
/// the caller's state is left unchanged either way, since every call site
/// allocates before mutating anything.
fn zeroed(len: usize) -> Result<Box<[u8]>> {
    let mut storage: Vec<u8> = Vec::new();
    storage.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    storage.resize(len, 0);
    Ok(storage.into_boxed_slice())
}
