// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A per-processor pool of OS threads that cooperatively run registered
//! [`ExecutionContext`]s, parking on an event queue between wakeups.

mod config;
mod error;
mod event_queue;
mod execution_context;
mod pool;
mod rundown;

#[cfg(test)]
mod tests;

pub use config::{ExecutionConfig, Flags};
pub use error::WorkerPoolError;
pub use execution_context::{ExecutionContext, WakeHandle};
pub use pool::{DynamicPool, WorkerPool, WorkerStats};

/// `Result` alias for the worker module's fallible operations.
pub type Result<T> = core::result::Result<T, WorkerPoolError>;
