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
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, span, warn, Level};

use crate::audio::{thread_priority, Sink, SinkError};
use crate::mixer::{MixStats, Mixer, MixerError, SystemMode};
use crate::playsync::ShutdownHandle;
use crate::samples::VoiceBank;
use crate::sensors::{Dispatcher, Polarity, Poller, ReleasePolicy, SensorReader, ThresholdTable};

pub const DEFAULT_BLOCK_FRAMES: usize = 256;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(30);

/// Runtime settings for a harp.
#[derive(Debug, Clone)]
pub struct Settings {
    pub block_frames: usize,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub polarity: Polarity,
    pub release: ReleasePolicy,
    /// Initial threshold for every channel.
    pub thresholds: Vec<i32>,
    /// Whether the system starts out active.
    pub active: bool,
}

impl Settings {
    /// Default settings for the given thresholds.
    pub fn new(thresholds: Vec<i32>) -> Settings {
        Settings {
            block_frames: DEFAULT_BLOCK_FRAMES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            polarity: Polarity::default(),
            release: ReleasePolicy::default(),
            thresholds,
            active: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarpError {
    #[error("a harp needs at least one voice")]
    NoVoices,

    #[error("{thresholds} thresholds configured for {voices} voices")]
    ThresholdCount { thresholds: usize, voices: usize },

    #[error("sensor reader has {sensors} channels for {voices} voices")]
    SensorCount { sensors: usize, voices: usize },

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error("unable to spawn {0} thread: {1}")]
    Spawn(&'static str, io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// A running harp: one mixer thread feeding the sink and one poller thread watching the beams.
pub struct Harp {
    voices: Arc<VoiceBank>,
    thresholds: Arc<ThresholdTable>,
    mode: SystemMode,
    shutdown: ShutdownHandle,
    mixer_thread: Option<JoinHandle<Result<MixStats, SinkError>>>,
    poller_thread: Option<JoinHandle<()>>,
}

impl Harp {
    /// Starts mixing into `sink` and polling `sensors`. The harp owns both until it is stopped.
    pub fn start(
        settings: Settings,
        voices: VoiceBank,
        mut sink: Box<dyn Sink>,
        sensors: Box<dyn SensorReader>,
    ) -> Result<Harp, HarpError> {
        if voices.is_empty() {
            return Err(HarpError::NoVoices);
        }
        if settings.thresholds.len() != voices.len() {
            return Err(HarpError::ThresholdCount {
                thresholds: settings.thresholds.len(),
                voices: voices.len(),
            });
        }
        if sensors.channel_count() != voices.len() {
            return Err(HarpError::SensorCount {
                sensors: sensors.channel_count(),
                voices: voices.len(),
            });
        }

        let voices = Arc::new(voices);
        let mixer = Mixer::new(voices.clone(), sink.format(), settings.block_frames)?;
        let thresholds = Arc::new(ThresholdTable::new(&settings.thresholds));
        let mode = SystemMode::new(settings.active);
        let shutdown = ShutdownHandle::new();

        info!(
            voices = voices.len(),
            memory = voices.memory_size(),
            sink = sink.to_string(),
            "Starting harp"
        );

        let mixer_thread = {
            let mode = mode.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("lharp-mixer".into())
                .spawn(move || {
                    let span = span!(Level::INFO, "mixer");
                    let _enter = span.enter();
                    thread_priority::promote_mixer_thread();
                    mixer.run(sink.as_mut(), &mode, &shutdown)
                })
                .map_err(|e| HarpError::Spawn("mixer", e))?
        };

        let poller = Poller::new(
            sensors,
            thresholds.clone(),
            settings.polarity,
            settings.debounce,
            Dispatcher::new(voices.clone(), settings.release),
            mode.clone(),
            settings.poll_interval,
        );
        let poller_thread = match poller.spawn(shutdown.clone()) {
            Ok(thread) => thread,
            Err(e) => {
                shutdown.cancel();
                if mixer_thread.join().is_err() {
                    error!("Mixer thread panicked while aborting start");
                }
                return Err(HarpError::Spawn("poller", e));
            }
        };

        Ok(Harp {
            voices,
            thresholds,
            mode,
            shutdown,
            mixer_thread: Some(mixer_thread),
            poller_thread: Some(poller_thread),
        })
    }

    /// Restarts the note on `channel` as if its beam had been broken.
    pub fn trigger(&self, channel: usize) -> bool {
        self.voices.trigger(channel)
    }

    /// Returns true while the note on `channel` is playing.
    pub fn is_active(&self, channel: usize) -> bool {
        self.voices.is_active(channel)
    }

    /// Turns the whole system on or off. While off nothing is polled, mixed or written.
    pub fn set_active(&self, active: bool) {
        if self.mode.is_active() != active {
            info!(active, "System mode changed");
        }
        self.mode.set_active(active);
    }

    pub fn is_system_active(&self) -> bool {
        self.mode.is_active()
    }

    /// The live threshold table. Changes take effect on the next poll.
    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn voices(&self) -> &VoiceBank {
        &self.voices
    }

    /// Returns true once the mixer has exited, e.g. after a sink failure.
    pub fn is_finished(&self) -> bool {
        self.mixer_thread
            .as_ref()
            .is_none_or(|thread| thread.is_finished())
    }

    /// Stops polling and mixing, flushes and closes the sink and joins both threads.
    /// Safe to call more than once; later calls return Ok.
    pub fn stop(&mut self) -> Result<Option<MixStats>, HarpError> {
        self.shutdown.cancel();
        self.join()
    }

    /// Waits for both threads to exit. Returns once the mixer stops on its own (a sink failure)
    /// or after `stop`, and takes the poller down with it.
    pub fn join(&mut self) -> Result<Option<MixStats>, HarpError> {
        let mixed = match self.mixer_thread.take() {
            Some(thread) => Some(thread.join().map_err(|_| HarpError::Panicked("mixer"))?),
            None => None,
        };

        // The mixer is gone, so nothing is listening to the beams anymore.
        self.shutdown.cancel();
        if let Some(thread) = self.poller_thread.take() {
            thread.join().map_err(|_| HarpError::Panicked("poller"))?;
        }

        match mixed {
            Some(Ok(stats)) => {
                info!(blocks = stats.blocks, "Harp stopped");
                Ok(Some(stats))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

impl Drop for Harp {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(err = %e, "Harp stopped with an error");
        }
    }
}
