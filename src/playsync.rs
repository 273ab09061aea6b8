// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A shutdown handle is shared by the harp's worker threads. Each loop checks it once per
/// iteration and exits when it has been cancelled.
#[derive(Clone)]
pub struct ShutdownHandle {
    /// Fast path for the per-block check.
    cancelled: Arc<AtomicBool>,
    /// Guards sleeping waiters against missed wakeups.
    lock: Arc<Mutex<()>>,
    /// Wakes loops sleeping in wait_timeout.
    condvar: Arc<Condvar>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Creates a new shutdown handle.
    pub fn new() -> ShutdownHandle {
        ShutdownHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            lock: Arc::new(Mutex::new(())),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true once shutdown has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Requests shutdown and wakes every sleeping loop.
    pub fn cancel(&self) {
        let _guard = self.lock.lock();
        self.cancelled.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Sleeps for up to `timeout`, returning early on shutdown.
    /// Returns true if shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_cancelled() {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}
