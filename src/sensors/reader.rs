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
    atomic::{AtomicI32, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Errors reported while reading sensors.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("expected {expected} sensor channels, got {got}")]
    ChannelCount { expected: usize, got: usize },

    #[error("sensor read failed: {0}")]
    Read(String),
}

/// A source of raw per-channel intensity readings. ADC plumbing lives behind this trait.
pub trait SensorReader: Send {
    /// Number of channels this reader produces.
    fn channel_count(&self) -> usize;

    /// Fills `out` with the latest reading of every channel.
    fn read(&mut self, out: &mut [i32]) -> Result<(), SensorError>;
}

/// Sensors whose readings are set from another thread. Used to drive the harp from the keyboard
/// when no photodiodes are attached.
pub struct SimulatedSensors {
    levels: Arc<[AtomicI32]>,
}

/// Sets the readings of a SimulatedSensors from outside the poller.
#[derive(Clone)]
pub struct SimulatedHandle {
    levels: Arc<[AtomicI32]>,
    idle: Arc<[i32]>,
}

impl SimulatedSensors {
    /// Creates simulated sensors sitting at the given idle readings.
    pub fn new(idle: &[i32]) -> (SimulatedSensors, SimulatedHandle) {
        let levels: Arc<[AtomicI32]> = idle.iter().map(|l| AtomicI32::new(*l)).collect();
        (
            SimulatedSensors {
                levels: levels.clone(),
            },
            SimulatedHandle {
                levels,
                idle: Arc::from(idle),
            },
        )
    }
}

impl SensorReader for SimulatedSensors {
    fn channel_count(&self) -> usize {
        self.levels.len()
    }

    fn read(&mut self, out: &mut [i32]) -> Result<(), SensorError> {
        if out.len() != self.levels.len() {
            return Err(SensorError::ChannelCount {
                expected: out.len(),
                got: self.levels.len(),
            });
        }
        for (dst, level) in out.iter_mut().zip(self.levels.iter()) {
            *dst = level.load(Ordering::Relaxed);
        }
        Ok(())
    }
}

impl SimulatedHandle {
    /// Sets the reading of `channel`. Returns false for an unknown channel.
    pub fn set(&self, channel: usize, level: i32) -> bool {
        match self.levels.get(channel) {
            Some(l) => {
                l.store(level, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Returns `channel` to its idle reading.
    pub fn release(&self, channel: usize) -> bool {
        match self.idle.get(channel) {
            Some(idle) => self.set(channel, *idle),
            None => false,
        }
    }

    /// Holds `channel` at `level` for `hold`, then releases it. Returns immediately.
    pub fn pluck(&self, channel: usize, level: i32, hold: Duration) -> bool {
        if !self.set(channel, level) {
            return false;
        }
        debug!(channel, level, hold = ?hold, "Simulated pluck");
        let handle = self.clone();
        thread::spawn(move || {
            thread::sleep(hold);
            handle.release(channel);
        });
        true
    }

    pub fn channel_count(&self) -> usize {
        self.levels.len()
    }
}

/// Plays back a fixed sequence of readings, repeating the last one forever.
#[cfg(test)]
pub struct ScriptedSensors {
    frames: Vec<Vec<i32>>,
    position: usize,
}

#[cfg(test)]
impl ScriptedSensors {
    pub fn new(frames: Vec<Vec<i32>>) -> ScriptedSensors {
        assert!(!frames.is_empty(), "a script needs at least one frame");
        ScriptedSensors {
            frames,
            position: 0,
        }
    }
}

#[cfg(test)]
impl SensorReader for ScriptedSensors {
    fn channel_count(&self) -> usize {
        self.frames[0].len()
    }

    fn read(&mut self, out: &mut [i32]) -> Result<(), SensorError> {
        let frame = &self.frames[self.position.min(self.frames.len() - 1)];
        if frame.len() != out.len() {
            return Err(SensorError::Read(format!(
                "scripted frame {} has {} channels",
                self.position,
                frame.len()
            )));
        }
        out.copy_from_slice(frame);
        self.position += 1;
        Ok(())
    }
}
