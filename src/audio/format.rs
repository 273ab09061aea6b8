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

use std::{error::Error, fmt, str::FromStr};

/// Raw PCM sample encodings understood by the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Unsigned 8-bit samples centered at 128.
    U8,
    /// Signed 16-bit little-endian samples centered at 0.
    S16,
}

impl FromStr for SampleEncoding {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" => Ok(SampleEncoding::U8),
            "s16" => Ok(SampleEncoding::S16),
            _ => Err(format!("Unsupported sample encoding: {}", s).into()),
        }
    }
}

impl SampleEncoding {
    /// Convert to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            SampleEncoding::U8 => "u8",
            SampleEncoding::S16 => "s16",
        }
    }

    /// The encoding for the given WAV bit depth, if supported.
    pub fn from_bits(bits: u16) -> Option<SampleEncoding> {
        match bits {
            8 => Some(SampleEncoding::U8),
            16 => Some(SampleEncoding::S16),
            _ => None,
        }
    }

    /// Number of bytes occupied by one sample.
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::U8 => 1,
            SampleEncoding::S16 => 2,
        }
    }

    /// Smallest centered value the encoding can represent.
    #[inline]
    pub fn centered_min(self) -> i32 {
        match self {
            SampleEncoding::U8 => i8::MIN as i32,
            SampleEncoding::S16 => i16::MIN as i32,
        }
    }

    /// Largest centered value the encoding can represent.
    #[inline]
    pub fn centered_max(self) -> i32 {
        match self {
            SampleEncoding::U8 => i8::MAX as i32,
            SampleEncoding::S16 => i16::MAX as i32,
        }
    }

    /// Reads sample `index` out of `data` as a centered value.
    /// Returns None when the sample lies outside of the buffer.
    #[inline]
    pub fn decode(self, data: &[u8], index: usize) -> Option<i32> {
        match self {
            SampleEncoding::U8 => data.get(index).map(|&b| b as i32 - 128),
            SampleEncoding::S16 => {
                let start = index.checked_mul(2)?;
                let bytes = data.get(start..start + 2)?;
                Some(i16::from_le_bytes([bytes[0], bytes[1]]) as i32)
            }
        }
    }

    /// Clamps a centered value into range and writes it in the native representation.
    /// `out` must be exactly `bytes_per_sample` long.
    #[inline]
    pub fn encode(self, centered: i32, out: &mut [u8]) {
        let clipped = centered.clamp(self.centered_min(), self.centered_max());
        match self {
            SampleEncoding::U8 => out[0] = (clipped + 128) as u8,
            SampleEncoding::S16 => out.copy_from_slice(&(clipped as i16).to_le_bytes()),
        }
    }

    /// Converts a centered value to a float in [-1.0, 1.0].
    #[inline]
    pub fn to_f32(self, centered: i32) -> f32 {
        centered as f32 / -(self.centered_min() as f32)
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed format of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample encoding shared by voices and output.
    pub encoding: SampleEncoding,
    /// Number of interleaved output channels.
    pub channels: u16,
}

impl PcmFormat {
    /// Creates a new PcmFormat
    pub fn new(
        sample_rate: u32,
        encoding: SampleEncoding,
        channels: u16,
    ) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }
        if channels == 0 {
            return Err("There must be at least one output channel".into());
        }

        Ok(PcmFormat {
            sample_rate,
            encoding,
            channels,
        })
    }

    /// Bytes in one interleaved output frame.
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes in a block of `frames` output frames.
    pub fn block_bytes(&self, frames: usize) -> usize {
        self.frame_bytes() * frames
    }
}

impl Default for PcmFormat {
    /// 22.05kHz unsigned 8-bit stereo, the format the harp notes are recorded in.
    fn default() -> Self {
        PcmFormat {
            sample_rate: 22050,
            encoding: SampleEncoding::U8,
            channels: 2,
        }
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {} x{}",
            self.sample_rate, self.encoding, self.channels
        )
    }
}
