// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{reassembly::Mode, Error, ReassemblyBuffer};
use alloc::vec;

/// Writes with an effectively unbounded `write_limit`, for tests that don't
/// care about per-call admission accounting.
fn w(buf: &mut ReassemblyBuffer, offset: u64, data: &[u8]) -> bool {
    let mut limit = u64::MAX;
    buf.write(offset, data, &mut limit).unwrap()
}

fn collect_readable(buf: &mut ReassemblyBuffer) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec::Vec::new();
    while let Some(req) = buf.read().unwrap() {
        let len: usize = req.buffers.iter().map(|b| b.len()).sum();
        for b in &req.buffers {
            out.extend_from_slice(b);
        }
        buf.drain(len as u64).unwrap();
    }
    out
}

/// Drains `length` bytes from `buf` and asserts the call reports a full
/// drain, the common case used by most tests here.
fn drain_fully(buf: &mut ReassemblyBuffer, length: u64) {
    let outcome = buf.drain(length).unwrap();
    assert!(outcome.fully_drained);
}

#[test]
fn single_mode_in_order_write_and_read() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    w(&mut buf, 0, b"hello");
    w(&mut buf, 5, b" world");
    assert_eq!(collect_readable(&mut buf), b"hello world");
}

#[test]
fn circular_mode_out_of_order_write() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Circular, 16, 1024).unwrap();
    assert!(!w(&mut buf, 5, b"world"));
    assert!(buf.read().unwrap().is_none());
    assert!(w(&mut buf, 0, b"hello"));
    assert_eq!(collect_readable(&mut buf), b"helloworld");
}

#[test]
fn circular_mode_wraps_around_the_ring() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Circular, 8, 1024).unwrap();
    w(&mut buf, 0, b"abcdef");
    let req = buf.read().unwrap().unwrap();
    let len: usize = req.buffers.iter().map(|b| b.len()).sum();
    assert_eq!(len, 6);
    drain_fully(&mut buf, 6);
    // base_offset has advanced, so the next write wraps past the end of
    // the 8-byte ring.
    w(&mut buf, 6, b"ghijk");
    assert_eq!(collect_readable(&mut buf), b"ghijk");
}

#[test]
fn single_mode_grows_on_demand() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 4, 1024).unwrap();
    w(&mut buf, 0, b"01234567");
    assert_eq!(collect_readable(&mut buf), b"01234567");
}

#[test]
fn reset_read_replays_the_same_bytes() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    w(&mut buf, 0, b"abcd");
    let first = buf.read().unwrap().unwrap();
    assert_eq!(&first.buffers[0][..], b"abcd");
    buf.reset_read().unwrap();
    let second = buf.read().unwrap().unwrap();
    assert_eq!(&second.buffers[0][..], b"abcd");
}

#[test]
fn write_past_virtual_length_is_rejected() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 8).unwrap();
    let mut limit = u64::MAX;
    assert_eq!(buf.write(4, b"12345", &mut limit), Err(Error::BufferTooSmall));
}

/// Literal scenario 6 from the spec: alloc=8, virtual=16, base_offset=0;
/// write [10,10) ends at 20, past the 16-byte window, so it's rejected
/// regardless of how generous the caller's own `write_limit` is.
#[test]
fn flow_control_violation_ignores_write_limit() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 8, 16).unwrap();
    let mut limit = 100u64;
    let data = vec![0u8; 10];
    assert_eq!(buf.write(10, &data, &mut limit), Err(Error::BufferTooSmall));
}

#[test]
fn write_limit_bounds_newly_admitted_bytes_only() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    // first write of 4 bytes admits exactly 4 new bytes.
    let mut limit = 4u64;
    assert!(buf.write(0, b"abcd", &mut limit).unwrap());
    assert_eq!(limit, 4);

    // a write that's only a partial retransmission plus a 2-byte tail
    // should admit only the 2 new bytes, not the whole 4-byte span.
    let mut limit = 1u64;
    assert_eq!(buf.write(2, b"cdef", &mut limit), Err(Error::BufferTooSmall));
    let mut limit = 2u64;
    assert!(buf.write(2, b"cdef", &mut limit).unwrap());
    assert_eq!(limit, 2);
}

#[test]
fn duplicate_write_reports_not_ready_and_zero_limit() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    assert!(w(&mut buf, 0, b"abcd"));
    let mut limit = u64::MAX;
    assert!(!buf.write(0, b"abcd", &mut limit).unwrap());
    assert_eq!(limit, 0);
}

#[test]
fn write_longer_than_u16_is_rejected() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 4, u32::MAX as u64 + 1).unwrap();
    let data = vec![0u8; u16::MAX as usize + 1];
    let mut limit = u64::MAX;
    assert_eq!(buf.write(0, &data, &mut limit), Err(Error::InvalidParameter));
}

#[test]
fn retransmitted_bytes_below_base_offset_are_ignored() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    w(&mut buf, 0, b"abcd");
    let req = buf.read().unwrap().unwrap();
    let len: usize = req.buffers.iter().map(|b| b.len()).sum();
    drain_fully(&mut buf, len as u64);
    // resend of already-drained bytes plus a fresh tail
    w(&mut buf, 0, b"abcdef");
    assert_eq!(collect_readable(&mut buf), b"ef");
}

#[test]
fn write_entirely_below_base_offset_is_a_pure_no_op() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    w(&mut buf, 0, b"abcd");
    let req = buf.read().unwrap().unwrap();
    let len: usize = req.buffers.iter().map(|b| b.len()).sum();
    drain_fully(&mut buf, len as u64);
    let mut limit = 100u64;
    assert!(!buf.write(0, b"abcd", &mut limit).unwrap());
    assert_eq!(limit, 0);
}

#[test]
fn multiple_mode_supports_concurrent_outstanding_reads() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Multiple, 16, 1024).unwrap();
    w(&mut buf, 0, b"abcd");
    let first = buf.read().unwrap().unwrap();
    assert_eq!(&first.buffers[0][..], b"abcd");
    // a second read call with nothing new written yields nothing, but the
    // first read's view is still valid even though it hasn't drained.
    assert!(buf.read().unwrap().is_none());
    assert_eq!(&first.buffers[0][..], b"abcd");
    drain_fully(&mut buf, 4);
}

/// Spec scenario 5: alloc=8, virtual=32. An outstanding read pins chunk0
/// externally referenced, so the append forced by the second write must go
/// through `resize`'s append-new-leave-old branch rather than an ad hoc
/// allocator, and the resulting total allocation must stay within budget.
#[test]
fn multiple_mode_append_growth_stays_within_virtual_budget() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Multiple, 8, 32).unwrap();
    w(&mut buf, 0, &[0u8; 8]);
    let first = buf.read().unwrap().unwrap();
    assert_eq!(first.buffers.iter().map(|b| b.len()).sum::<usize>(), 8);

    assert!(w(&mut buf, 8, &[0u8; 8]));

    assert!(
        buf.total_alloc_length() <= 32,
        "total alloc length {} exceeded the 32-byte virtual budget",
        buf.total_alloc_length()
    );

    drain_fully(&mut buf, 8);
    let second = buf.read().unwrap().unwrap();
    assert_eq!(second.buffers.iter().map(|b| b.len()).sum::<usize>(), 8);
}

#[test]
fn app_owned_mode_hands_back_drained_chunks() {
    let mut buf = ReassemblyBuffer::initialize(Mode::AppOwned, 0, 1024).unwrap();
    buf.provide_chunks([vec![0u8; 4].into_boxed_slice()]).unwrap();
    w(&mut buf, 0, b"abcd");
    let req = buf.read().unwrap().unwrap();
    let len: usize = req.buffers.iter().map(|b| b.len()).sum();
    let outcome = buf.drain(len as u64).unwrap();
    assert_eq!(outcome.returned_chunks.len(), 1);
    assert_eq!(outcome.returned_chunks[0].len(), 4);
}

#[test]
fn app_owned_mode_rejects_writes_without_capacity() {
    let mut buf = ReassemblyBuffer::initialize(Mode::AppOwned, 0, 1024).unwrap();
    let mut limit = u64::MAX;
    assert_eq!(buf.write(0, b"abcd", &mut limit), Err(Error::BufferTooSmall));
}

#[test]
fn increase_virtual_buffer_length_raises_the_write_ceiling() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 4).unwrap();
    let mut limit = u64::MAX;
    assert_eq!(buf.write(0, b"12345", &mut limit), Err(Error::BufferTooSmall));
    buf.increase_virtual_buffer_length(8);
    w(&mut buf, 0, b"12345");
}

/// The window's hard cap tracks `base_offset + virtual_buffer_length`, not
/// a fixed absolute offset: once bytes drain past the original window,
/// the peer may write further out without an explicit window increase.
#[test]
fn flow_control_window_advances_with_base_offset() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Circular, 8, 8).unwrap();
    w(&mut buf, 0, b"abcdefgh");
    let req = buf.read().unwrap().unwrap();
    let len: usize = req.buffers.iter().map(|b| b.len()).sum();
    drain_fully(&mut buf, len as u64);
    // base_offset is now 8; a write ending at 16 is within the
    // still-8-byte window relative to the new base_offset.
    let mut limit = u64::MAX;
    assert!(buf.write(8, b"ijklmnop", &mut limit).is_ok());
}

/// Multiple mode, alloc=8 virtual=24: write [0,8), read all 8, partially
/// drain only 4 of them (the first chunk is still the sole chunk, so
/// `read_start` must advance to 4 -- the chunk's ring still has the other 4
/// bytes live, pinned by the still-outstanding first `read`), then write
/// [8,16), which forces a resize since the chunk's capacity is exhausted.
/// The new bytes must land in the chunk's freed front (physical offset
/// 0..4, now safe since `read_start` moved past it) and the appended
/// second chunk, without the write ever touching the still-live,
/// not-yet-drained 4 bytes at physical offset 4..8.
#[test]
fn multiple_mode_partial_drain_advances_read_start_before_resize() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Multiple, 8, 24).unwrap();
    w(&mut buf, 0, &[1u8; 8]);
    let first = buf.read().unwrap().unwrap();
    assert_eq!(first.buffers.iter().map(|b| b.len()).sum::<usize>(), 8);

    let outcome = buf.drain(4).unwrap();
    assert!(!outcome.fully_drained);

    assert!(w(&mut buf, 8, &[2u8; 8]));

    // the first read's remaining 4 bytes are still outstanding (pending),
    // so this second read only surfaces the newly written, previously
    // unread span -- not a re-hand-out of what's already on loan.
    let second = buf.read().unwrap().unwrap();
    assert_eq!(second.offset, 8);
    let bytes: Vec<u8> = second.buffers.iter().flat_map(|b| b.iter().copied()).collect();
    assert_eq!(bytes, vec![2u8; 8]);

    // drains the remaining 4 bytes still on loan from the first read plus
    // all 8 bytes from the second, covering the rest of the stream.
    drain_fully(&mut buf, 12);
    assert!(buf.read().unwrap().is_none());
}

#[test]
fn drain_reports_whether_fully_drained() {
    let mut buf = ReassemblyBuffer::initialize(Mode::Single, 16, 1024).unwrap();
    w(&mut buf, 0, b"abcdef");
    let req = buf.read().unwrap().unwrap();
    assert_eq!(req.buffers.iter().map(|b| b.len()).sum::<usize>(), 6);

    let partial = buf.drain(4).unwrap();
    assert!(!partial.fully_drained);

    let req = buf.read().unwrap().unwrap();
    assert_eq!(req.buffers.iter().map(|b| b.len()).sum::<usize>(), 2);
    let full = buf.drain(2).unwrap();
    assert!(full.fully_drained);
}
