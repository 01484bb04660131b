// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reassembly of out-of-order stream bytes into a contiguous, readable window.

mod chunk;
mod error;
mod reassembly;
mod written_ranges;

#[cfg(test)]
mod tests;

pub use chunk::ReadBuf;
pub use error::Error;
pub use reassembly::{DrainOutcome, Mode, ReadRequest, ReassemblyBuffer};
pub use written_ranges::WrittenRanges;

/// `Result` alias for the buffer module's fallible operations.
pub type Result<T> = core::result::Result<T, Error>;
