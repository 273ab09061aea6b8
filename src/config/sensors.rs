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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::harp::{DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL};
use crate::sensors::{Polarity, ReleasePolicy};

/// Threshold used for every channel when none are configured.
pub const DEFAULT_THRESHOLD: i32 = 500;

/// A YAML representation of the beam sensor configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Sensors {
    /// How often the sensors are read, e.g. "20ms".
    poll_interval: Option<String>,

    /// How long a reading must hold before it counts, e.g. "30ms".
    debounce: Option<String>,

    /// Which side of the threshold means the beam is broken.
    polarity: Option<Polarity>,

    /// What happens to a note when its beam is restored.
    release: Option<ReleasePolicy>,

    /// Per-channel break thresholds, in raw sensor units.
    thresholds: Option<Vec<i32>>,
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::Duration {
                field,
                value: value.clone(),
                reason: e.to_string(),
            })?
            .into()),
        None => Ok(default),
    }
}

impl Sensors {
    /// Returns the sensor polling interval.
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("poll_interval", &self.poll_interval, DEFAULT_POLL_INTERVAL)
    }

    /// Returns the debounce window.
    pub fn debounce(&self) -> Result<Duration, ConfigError> {
        parse_duration("debounce", &self.debounce, DEFAULT_DEBOUNCE)
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity.unwrap_or_default()
    }

    pub fn release(&self) -> ReleasePolicy {
        self.release.unwrap_or_default()
    }

    /// Returns one threshold per channel. Without configured thresholds every channel gets the
    /// default; otherwise the count must match.
    pub fn thresholds(&self, channels: usize) -> Result<Vec<i32>, ConfigError> {
        match &self.thresholds {
            Some(thresholds) if thresholds.len() != channels => {
                Err(ConfigError::ThresholdCount {
                    thresholds: thresholds.len(),
                    voices: channels,
                })
            }
            Some(thresholds) => Ok(thresholds.clone()),
            None => Ok(vec![DEFAULT_THRESHOLD; channels]),
        }
    }
}
