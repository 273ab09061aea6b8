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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

mod audio;
mod error;
mod sensors;

pub use self::audio::Audio;
pub use self::error::ConfigError;
pub use self::sensors::{Sensors, DEFAULT_THRESHOLD};

use crate::harp;

/// The configuration for a harp.
#[derive(Deserialize, Clone, Debug)]
pub struct Harp {
    /// The output configuration.
    #[serde(default)]
    audio: Audio,

    /// The beam sensor configuration.
    #[serde(default)]
    sensors: Sensors,

    /// One WAV file per beam, in channel order.
    #[serde(default)]
    voices: Vec<String>,

    /// Directory relative voice paths are resolved against.
    #[serde(skip)]
    base_path: PathBuf,
}

impl Harp {
    /// Parse a harp configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Harp, ConfigError> {
        let mut harp = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Harp>()?;
        harp.base_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(harp)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    /// Voice files with relative paths resolved against the config file's directory.
    pub fn voice_paths(&self) -> Vec<PathBuf> {
        self.voices
            .iter()
            .map(|voice| {
                let path = Path::new(voice);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.base_path.join(path)
                }
            })
            .collect()
    }

    /// Validates the configuration and builds the runtime settings.
    pub fn settings(&self) -> Result<harp::Settings, ConfigError> {
        if self.voices.is_empty() {
            return Err(ConfigError::NoVoices);
        }
        self.audio.latency()?;

        Ok(harp::Settings {
            block_frames: self.audio.block_frames()?,
            poll_interval: self.sensors.poll_interval()?,
            debounce: self.sensors.debounce()?,
            polarity: self.sensors.polarity(),
            release: self.sensors.release(),
            thresholds: self.sensors.thresholds(self.voices.len())?,
            active: true,
        })
    }
}
