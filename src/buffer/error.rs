// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Errors produced by [`super::ReassemblyBuffer`] operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An allocation failed; no state was mutated and the caller may retry.
    OutOfMemory,
    /// The peer exceeded the advertised virtual window, or the caller's
    /// own per-call `write_limit`.
    BufferTooSmall,
    /// An argument violated a precondition checkable before any mutation,
    /// e.g. a non power-of-two length or a write longer than `u16::MAX`.
    InvalidParameter,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "allocation failed"),
            Self::BufferTooSmall => write!(f, "write exceeds the buffer's flow-control window"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
