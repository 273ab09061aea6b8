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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use super::{PcmFormat, SinkError};

/// Shared state between a mock sink and the handles observing it.
#[derive(Default)]
struct Shared {
    recorded: Mutex<Vec<u8>>,
    accepted_bytes: AtomicUsize,
    write_calls: AtomicUsize,
    flushes: AtomicUsize,
    closed: AtomicBool,
}

/// A mock sink. Doesn't play anything, but keeps track of what it was asked to play.
pub struct Sink {
    name: String,
    format: PcmFormat,
    /// Caps how many bytes a single write accepts, to exercise partial writes.
    max_accept: Option<usize>,
    /// When set, writes sleep for the real duration of the audio they accept.
    paced: bool,
    /// When unset, only counters are kept so a long-running mock doesn't grow without bound.
    record: bool,
    /// When set, every flush reports a stalled device.
    stall_flushes: bool,
    shared: Arc<Shared>,
}

/// Observes a mock sink after it has been moved into the mixer thread.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Sink {
    /// Creates a recording, unpaced mock sink.
    pub fn new(name: &str, format: PcmFormat) -> Sink {
        Sink {
            name: name.to_string(),
            format,
            max_accept: None,
            paced: false,
            record: true,
            stall_flushes: false,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Emulates device back-pressure and stops recording audio.
    pub fn paced(mut self) -> Sink {
        self.paced = true;
        self.record = false;
        self
    }

    /// Emulates device back-pressure while still recording everything written.
    #[cfg(test)]
    pub fn paced_recording(mut self) -> Sink {
        self.paced = true;
        self
    }

    /// Limits every write to at most `bytes` bytes.
    #[cfg(test)]
    pub fn accept_at_most(mut self, bytes: usize) -> Sink {
        self.max_accept = Some(bytes);
        self
    }

    /// Makes every flush fail as if the device stopped draining.
    #[cfg(test)]
    pub fn stall_flushes(mut self) -> Sink {
        self.stall_flushes = true;
        self
    }

    /// Returns a handle for inspecting this sink.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }
}

impl Handle {
    /// All bytes accepted so far, if recording.
    pub fn recorded(&self) -> Vec<u8> {
        self.shared.recorded.lock().clone()
    }

    /// Total bytes accepted so far.
    pub fn accepted_bytes(&self) -> usize {
        self.shared.accepted_bytes.load(Ordering::Acquire)
    }

    /// Number of write calls so far.
    pub fn write_calls(&self) -> usize {
        self.shared.write_calls.load(Ordering::Acquire)
    }

    /// Number of flushes so far.
    pub fn flushes(&self) -> usize {
        self.shared.flushes.load(Ordering::Acquire)
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl super::Sink for Sink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, block: &[u8]) -> Result<usize, SinkError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        self.shared.write_calls.fetch_add(1, Ordering::AcqRel);

        let accepted = match self.max_accept {
            Some(max) => block.len().min(max),
            None => block.len(),
        };
        if self.record {
            self.shared
                .recorded
                .lock()
                .extend_from_slice(&block[..accepted]);
        }
        self.shared
            .accepted_bytes
            .fetch_add(accepted, Ordering::AcqRel);

        if self.paced {
            let frames = accepted / self.format.frame_bytes().max(1);
            spin_sleep::sleep(Duration::from_secs_f64(
                frames as f64 / self.format.sample_rate as f64,
            ));
        }

        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        debug!(device = self.name, "Flushing mock sink");
        self.shared.flushes.fetch_add(1, Ordering::AcqRel);
        if self.stall_flushes {
            return Err(SinkError::Stalled(Duration::ZERO));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
