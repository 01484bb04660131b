// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors produced while constructing or tearing down a [`super::WorkerPool`].
#[derive(Debug)]
pub enum WorkerPoolError {
    /// The requested processor list was empty, or named a processor the
    /// host doesn't have.
    InvalidProcessorList,
    /// Creating a worker's event queue failed.
    EventQueue(std::io::Error),
    /// Spawning a worker's OS thread failed.
    Thread(std::io::Error),
}

impl fmt::Display for WorkerPoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidProcessorList => write!(f, "invalid or empty processor list"),
            Self::EventQueue(e) => write!(f, "failed to create worker event queue: {e}"),
            Self::Thread(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for WorkerPoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidProcessorList => None,
            Self::EventQueue(e) | Self::Thread(e) => Some(e),
        }
    }
}
