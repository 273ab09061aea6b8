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
use std::{str::FromStr, time::Duration};

use serde::Deserialize;

use super::error::ConfigError;
use crate::audio::{PcmFormat, SampleEncoding};
use crate::harp::DEFAULT_BLOCK_FRAMES;

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_LATENCY_MS: u64 = 40;

/// Largest accepted mix block, about 3 seconds at 22050 Hz.
pub const MAX_BLOCK_FRAMES: usize = 65536;

/// Largest accepted output buffering.
pub const MAX_LATENCY_MS: u64 = 2000;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The output device. "default" picks the host's default device, "mock..." the mock sink.
    device: Option<String>,

    /// Output sample rate in Hz (default: 22050).
    sample_rate: Option<u32>,

    /// Output sample encoding, "u8" or "s16" (default: "u8").
    encoding: Option<String>,

    /// Number of output channels. The mono mix is copied to every channel (default: 2).
    channels: Option<u16>,

    /// Frames per mix block (default: 256).
    block_frames: Option<usize>,

    /// Target device buffering in milliseconds (default: 40).
    latency_ms: Option<u64>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(PcmFormat::default().sample_rate)
    }

    /// Returns the output sample encoding.
    pub fn encoding(&self) -> Result<SampleEncoding, ConfigError> {
        match self.encoding.as_deref() {
            Some(encoding) => {
                SampleEncoding::from_str(encoding).map_err(|e| ConfigError::Format(e.to_string()))
            }
            None => Ok(PcmFormat::default().encoding),
        }
    }

    /// Returns the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(PcmFormat::default().channels)
    }

    /// Returns the number of frames in each mix block.
    pub fn block_frames(&self) -> Result<usize, ConfigError> {
        match self.block_frames {
            Some(frames) if frames == 0 || frames > MAX_BLOCK_FRAMES => {
                Err(ConfigError::BlockFrames {
                    value: frames,
                    max: MAX_BLOCK_FRAMES,
                })
            }
            Some(frames) => Ok(frames),
            None => Ok(DEFAULT_BLOCK_FRAMES),
        }
    }

    /// Returns the target device latency.
    pub fn latency(&self) -> Result<Duration, ConfigError> {
        match self.latency_ms {
            Some(ms) if ms == 0 || ms > MAX_LATENCY_MS => Err(ConfigError::Latency {
                value: ms,
                max: MAX_LATENCY_MS,
            }),
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Ok(Duration::from_millis(DEFAULT_LATENCY_MS)),
        }
    }

    /// Returns the validated output format.
    pub fn format(&self) -> Result<PcmFormat, ConfigError> {
        PcmFormat::new(self.sample_rate(), self.encoding()?, self.channels())
            .map_err(|e| ConfigError::Format(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Audio {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let audio = Audio::default();
        assert_eq!(audio.device(), "default");
        assert_eq!(audio.format().unwrap(), PcmFormat::default());
        assert_eq!(audio.block_frames().unwrap(), 256);
        assert_eq!(audio.latency().unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn test_full_config() {
        let audio = parse(
            r#"
            device: hw:1
            sample_rate: 44100
            encoding: s16
            channels: 1
            block_frames: 128
            latency_ms: 20
        "#,
        );

        assert_eq!(audio.device(), "hw:1");
        let format = audio.format().unwrap();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.encoding, SampleEncoding::S16);
        assert_eq!(format.channels, 1);
        assert_eq!(audio.block_frames().unwrap(), 128);
        assert_eq!(audio.latency().unwrap(), Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            parse("encoding: f32").format(),
            Err(ConfigError::Format(_))
        ));
        assert!(matches!(
            parse("channels: 0").format(),
            Err(ConfigError::Format(_))
        ));
        assert!(matches!(
            parse("sample_rate: 0").format(),
            Err(ConfigError::Format(_))
        ));
        assert!(matches!(
            parse("block_frames: 0").block_frames(),
            Err(ConfigError::BlockFrames { value: 0, .. })
        ));
    }

    #[test]
    fn test_oversized_buffers_rejected() {
        assert!(matches!(
            parse("block_frames: 10000000000").block_frames(),
            Err(ConfigError::BlockFrames {
                value: 10_000_000_000,
                max: MAX_BLOCK_FRAMES
            })
        ));
        assert_eq!(
            parse("block_frames: 65536").block_frames().unwrap(),
            MAX_BLOCK_FRAMES
        );

        assert!(matches!(
            parse("latency_ms: 0").latency(),
            Err(ConfigError::Latency { value: 0, .. })
        ));
        assert!(matches!(
            parse("latency_ms: 3600000").latency(),
            Err(ConfigError::Latency {
                value: 3_600_000,
                max: MAX_LATENCY_MS
            })
        ));
        assert_eq!(
            parse("latency_ms: 2000").latency().unwrap(),
            Duration::from_secs(2)
        );
    }
}
