// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Behavior switches for [`super::WorkerPool::create`], mirroring
/// `CXPLAT_WORKER_POOL_FLAGS` in `platform_worker.c`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Don't pin each worker thread to its processor's "ideal" CPU; let the
    /// OS scheduler place it freely.
    pub no_ideal_proc: bool,
    /// Request an elevated scheduling priority for worker threads, where the
    /// platform supports it.
    pub high_priority: bool,
    /// Set a hard CPU affinity mask instead of only an ideal-processor hint.
    pub affinitize: bool,
}

/// Construction parameters for a [`super::WorkerPool`].
///
/// Built directly by the caller -- there is no file or environment-variable
/// config layer here, that surface belongs to whatever embeds this crate.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Number of workers to create; one OS thread each.
    pub processor_count: u32,
    /// Optional explicit OS processor index per worker, length
    /// `processor_count`. `None` lets the pool assign `0..processor_count`.
    pub processor_list: Option<Vec<u32>>,
    pub flags: Flags,
}

impl ExecutionConfig {
    pub fn new(processor_count: u32) -> Self {
        Self {
            processor_count,
            processor_list: None,
            flags: Flags::default(),
        }
    }

    pub(super) fn resolved_processor_list(&self) -> Vec<u32> {
        match &self.processor_list {
            Some(list) => list.clone(),
            None => (0..self.processor_count).collect(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
