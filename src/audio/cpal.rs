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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, warn, Level};

use super::{PcmFormat, SinkError};

/// Smallest ring we'll allocate, in samples.
const MIN_RING_SAMPLES: usize = 1024;

/// How long the writer backs off while the ring is full.
const RING_FULL_BACKOFF: Duration = Duration::from_micros(500);

/// How long the ring may stay full before the device is considered stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a flush waits for the output callback to drain the ring.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// A short description of an output device, for listing.
pub struct DeviceSummary {
    name: String,
    host_id: cpal::HostId,
    max_channels: u16,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// Flags shared between the writer, the stream thread and the output callback.
#[derive(Default)]
struct StreamState {
    /// Set by the writer, cleared by the callback once the ring has been drained.
    flush_requested: AtomicBool,
    /// Set when the sink is closed; the stream thread drops the stream.
    closed: AtomicBool,
}

/// A sink that feeds a cpal output stream through a lock-free ring buffer.
pub struct Sink {
    name: String,
    format: PcmFormat,
    producer: rtrb::Producer<f32>,
    state: Arc<StreamState>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.format)
    }
}

/// Lists cpal output devices.
pub fn list() -> Result<Vec<DeviceSummary>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let max_channels = match device.supported_output_configs() {
                Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
                Err(_) => continue,
            };
            if max_channels > 0 {
                devices.push(DeviceSummary {
                    name: device.name()?,
                    host_id,
                    max_channels,
                });
            }
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Finds the named output device. "default" picks the default host's default device.
fn find_device(name: &str) -> Result<cpal::Device, Box<dyn Error>> {
    if name == "default" {
        return cpal::default_host()
            .default_output_device()
            .ok_or_else(|| "no default output device".into());
    }

    for host_id in cpal::available_hosts() {
        let Ok(devices) = cpal::host_from_id(host_id)?.output_devices() else {
            continue;
        };
        for device in devices {
            if device.name().is_ok_and(|n| n.trim() == name) {
                return Ok(device);
            }
        }
    }
    Err(format!("no device found with name {}", name).into())
}

/// Picks the device's native sample format for the requested channel count and rate.
fn native_sample_format(
    device: &cpal::Device,
    format: &PcmFormat,
) -> Result<cpal::SampleFormat, SinkError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| SinkError::Device(e.to_string()))?;
    configs
        .filter(|c| c.channels() == format.channels)
        .find(|c| {
            c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
        })
        .map(|c| c.sample_format())
        .ok_or_else(|| SinkError::UnsupportedFormat(format.to_string()))
}

/// Builds the output callback. Each invocation services a pending flush and then pulls samples
/// from the ring, filling any shortfall with silence.
fn create_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    mut consumer: rtrb::Consumer<f32>,
    state: Arc<StreamState>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        if state.flush_requested.load(Ordering::Acquire) {
            let buffered = consumer.slots();
            if let Ok(chunk) = consumer.read_chunk(buffered) {
                chunk.commit_all();
            }
            state.flush_requested.store(false, Ordering::Release);
        }

        for dst in data.iter_mut() {
            *dst = T::from_sample(consumer.pop().unwrap_or(0.0));
        }
    }
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    consumer: rtrb::Consumer<f32>,
    state: Arc<StreamState>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        create_callback::<T>(consumer, state),
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}

impl Sink {
    /// Opens the named device and starts streaming silence until blocks arrive.
    pub fn open(name: &str, format: PcmFormat, latency: Duration) -> Result<Sink, Box<dyn Error>> {
        let span = span!(Level::INFO, "open sink (cpal)");
        let _enter = span.enter();

        let device = find_device(name)?;
        let sample_format = native_sample_format(&device, &format)?;

        let ring_samples = ((format.sample_rate as f64 * latency.as_secs_f64()) as usize
            * format.channels as usize)
            .max(MIN_RING_SAMPLES);
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(ring_samples);
        let state = Arc::new(StreamState::default());

        // The stream isn't Send on every platform, so it is created and kept alive on its own
        // thread. The build result is handed back over a channel.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let stream_state = state.clone();
        let stream_thread = thread::Builder::new()
            .name("lharp-output".into())
            .spawn(move || {
                let config = cpal::StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                let state = stream_state.clone();
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, consumer, state)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, consumer, state)
                    }
                    cpal::SampleFormat::I32 => {
                        build_stream::<i32>(&device, &config, consumer, state)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, consumer, state)
                    }
                    cpal::SampleFormat::U8 => build_stream::<u8>(&device, &config, consumer, state),
                    other => {
                        let _ = ready_tx.send(Err(format!("unsupported device format {}", other)));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stream_state.closed.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(SinkError::Device(e).into());
            }
            Err(_) => {
                let _ = stream_thread.join();
                return Err(SinkError::Device("output thread exited".into()).into());
            }
        }

        info!(
            device = name,
            format = format.to_string(),
            native = sample_format.to_string(),
            ring_samples,
            "CPAL output stream started"
        );

        Ok(Sink {
            name: name.to_string(),
            format,
            producer,
            state,
            stream_thread: Some(stream_thread),
        })
    }
}

impl super::Sink for Sink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, block: &[u8]) -> Result<usize, SinkError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        let encoding = self.format.encoding;
        let bytes_per_sample = encoding.bytes_per_sample();
        let samples = block.len() / bytes_per_sample;
        if samples == 0 {
            return Err(SinkError::Misaligned(block.len()));
        }

        // Wait for room; this is the mixer's back-pressure.
        let started = Instant::now();
        while self.producer.slots() == 0 {
            if started.elapsed() > STALL_TIMEOUT {
                return Err(SinkError::Stalled(STALL_TIMEOUT));
            }
            thread::sleep(RING_FULL_BACKOFF);
        }

        let to_write = samples.min(self.producer.slots());
        for index in 0..to_write {
            let centered = encoding.decode(block, index).unwrap_or(0);
            if self.producer.push(encoding.to_f32(centered)).is_err() {
                return Ok(index * bytes_per_sample);
            }
        }
        Ok(to_write * bytes_per_sample)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.state.flush_requested.store(true, Ordering::Release);
        let started = Instant::now();
        while self.state.flush_requested.load(Ordering::Acquire) {
            if started.elapsed() > FLUSH_TIMEOUT {
                warn!(device = self.name, "Output callback did not drain the ring");
                return Err(SinkError::Stalled(FLUSH_TIMEOUT));
            }
            thread::sleep(RING_FULL_BACKOFF);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        if let Some(thread) = self.stream_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        super::Sink::close(self);
    }
}
