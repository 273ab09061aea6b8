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

//! Beam-break sensing.
//!
//! Raw photodiode readings are compared against per-channel thresholds, debounced into clean
//! edges and dispatched to the voice bank from a fixed-period polling thread.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::Deserialize;
use tracing::warn;

mod debounce;
mod dispatch;
mod poller;
mod reader;

pub use debounce::{Debouncer, Edge};
pub use dispatch::{Dispatcher, ReleasePolicy};
pub use poller::Poller;
pub use reader::{SensorError, SensorReader, SimulatedHandle, SimulatedSensors};

#[cfg(test)]
pub use reader::ScriptedSensors;

/// Which side of the threshold means the beam is broken.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Polarity {
    /// A reading below the threshold means the beam is broken (light lost on the photodiode).
    #[default]
    #[serde(rename = "below")]
    BrokenBelow,
    /// A reading above the threshold means the beam is broken (inverted sensor wiring).
    #[serde(rename = "above")]
    BrokenAbove,
}

impl Polarity {
    /// Compares a raw reading against a threshold.
    #[inline]
    pub fn is_broken(self, raw: i32, threshold: i32) -> bool {
        match self {
            Polarity::BrokenBelow => raw < threshold,
            Polarity::BrokenAbove => raw > threshold,
        }
    }

    /// A pair of (idle, broken) readings offset from the threshold by `margin`.
    pub fn levels_around(self, threshold: i32, margin: i32) -> (i32, i32) {
        let above = threshold.saturating_add(margin);
        let below = threshold.saturating_sub(margin);
        match self {
            Polarity::BrokenBelow => (above, below),
            Polarity::BrokenAbove => (below, above),
        }
    }
}

/// Per-channel trigger thresholds. Writable at runtime from any thread (e.g. a calibration
/// routine) while the poller reads them.
#[derive(Debug)]
pub struct ThresholdTable {
    thresholds: Box<[AtomicI32]>,
}

impl ThresholdTable {
    pub fn new(thresholds: &[i32]) -> ThresholdTable {
        ThresholdTable {
            thresholds: thresholds.iter().map(|t| AtomicI32::new(*t)).collect(),
        }
    }

    /// Threshold for `channel`, or None for an unknown channel.
    #[inline]
    pub fn get(&self, channel: usize) -> Option<i32> {
        self.thresholds
            .get(channel)
            .map(|t| t.load(Ordering::Relaxed))
    }

    /// Replaces the threshold for `channel`. Returns false for an unknown channel.
    pub fn set(&self, channel: usize, threshold: i32) -> bool {
        match self.thresholds.get(channel) {
            Some(t) => {
                t.store(threshold, Ordering::Relaxed);
                true
            }
            None => {
                warn!(channel, "Threshold for unknown channel");
                false
            }
        }
    }

    /// A copy of every threshold.
    pub fn snapshot(&self) -> Vec<i32> {
        self.thresholds
            .iter()
            .map(|t| t.load(Ordering::Relaxed))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
