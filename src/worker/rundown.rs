// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Condvar, Mutex};

/// A refcount-with-wait gate, mirroring `CXPLAT_RUNDOWN_REF`: shutdown
/// acquires the gate first (so no new references can be taken), then waits
/// for every outstanding reference to be released before tearing anything
/// down.
#[derive(Clone)]
pub struct Rundown {
    inner: Arc<(Mutex<State>, Condvar)>,
}

struct State {
    count: usize,
    acquiring: bool,
}

impl Rundown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(State {
                    count: 0,
                    acquiring: true,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Takes a reference, returning `None` once rundown has started.
    pub fn acquire(&self) -> Option<RundownGuard> {
        let (lock, _) = &*self.inner;
        let mut state = lock.lock().unwrap();
        if !state.acquiring {
            return None;
        }
        state.count += 1;
        Some(RundownGuard {
            inner: self.inner.clone(),
        })
    }

    /// Blocks new `acquire` calls and waits for every outstanding guard to
    /// drop.
    pub fn run_down(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.acquiring = false;
        while state.count > 0 {
            state = cvar.wait(state).unwrap();
        }
    }
}

impl Default for Rundown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RundownGuard {
    inner: Arc<(Mutex<State>, Condvar)>,
}

impl Drop for RundownGuard {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.count -= 1;
        if state.count == 0 {
            cvar.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_down_waits_for_outstanding_guards() {
        let rundown = Rundown::new();
        let guard = rundown.acquire().unwrap();
        let rundown2 = rundown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            drop(guard);
        });
        rundown2.run_down();
        handle.join().unwrap();
        assert!(rundown.acquire().is_none());
    }
}
