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
use std::{error::Error, fmt, thread, time::Duration};

use crate::config;

pub mod cpal;
pub mod format;
pub mod mock;
pub mod thread_priority;

pub use format::{PcmFormat, SampleEncoding};

/// How long write_all backs off when a sink accepts nothing.
const ZERO_ACCEPT_BACKOFF: Duration = Duration::from_micros(250);

/// Errors reported by an output sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("output sink is closed")]
    Closed,

    #[error("output device stalled for {0:?}")]
    Stalled(Duration),

    #[error("block of {0} bytes is not a whole number of samples")]
    Misaligned(usize),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("output device error: {0}")]
    Device(String),
}

/// A fixed-rate, fixed-format streaming output. The mixer pushes interleaved blocks into it and
/// the sink applies back-pressure by blocking in `write`.
pub trait Sink: fmt::Display + Send {
    /// The format every written block must be in.
    fn format(&self) -> PcmFormat;

    /// Pushes a prefix of `block` into the device, returning the number of bytes accepted.
    /// May block until the device has room.
    fn write(&mut self, block: &[u8]) -> Result<usize, SinkError>;

    /// Discards anything buffered in the device so that it outputs silence.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Releases the device. Writes after close fail with `SinkError::Closed`.
    fn close(&mut self);
}

/// Writes the whole block, retrying the remainder after partial acceptance.
/// Audio data is never dropped; only a hard sink error ends the attempt.
pub fn write_all(sink: &mut dyn Sink, block: &[u8]) -> Result<(), SinkError> {
    let mut remaining = block;
    while !remaining.is_empty() {
        let accepted = sink.write(remaining)?;
        if accepted == 0 {
            thread::sleep(ZERO_ACCEPT_BACKOFF);
            continue;
        }
        remaining = &remaining[accepted.min(remaining.len())..];
    }
    Ok(())
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceSummary>, Box<dyn Error>> {
    cpal::list()
}

/// Opens the sink described by the audio configuration.
pub fn get_sink(config: &config::Audio) -> Result<Box<dyn Sink>, Box<dyn Error>> {
    let format = config.format()?;
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Box::new(mock::Sink::new(device, format).paced()));
    };

    Ok(Box::new(cpal::Sink::open(device, format, config.latency()?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_all_retries_partial_acceptance() {
        let mut sink = mock::Sink::new("mock-partial", PcmFormat::default()).accept_at_most(3);
        let handle = sink.handle();

        let block: Vec<u8> = (0..10).collect();
        write_all(&mut sink, &block).unwrap();

        assert_eq!(handle.recorded(), block);
        // 3 + 3 + 3 + 1
        assert_eq!(handle.write_calls(), 4);
    }

    #[test]
    fn test_write_all_reports_closed_sink() {
        let mut sink = mock::Sink::new("mock-closed", PcmFormat::default());
        sink.close();

        assert!(matches!(
            write_all(&mut sink, &[128, 128]),
            Err(SinkError::Closed)
        ));
    }

    #[test]
    fn test_get_sink_mock() {
        let audio = config::Audio::new("mock-device");
        let sink = get_sink(&audio).unwrap();
        assert_eq!(sink.format(), PcmFormat::default());
        assert_eq!(sink.to_string(), "mock-device (Mock)");
    }
}
