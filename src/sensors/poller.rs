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
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Debouncer, Dispatcher, Polarity, SensorReader, ThresholdTable};
use crate::mixer::SystemMode;
use crate::playsync::ShutdownHandle;

/// Reads the sensors on a fixed period, debounces them and dispatches edges to the voices.
pub struct Poller {
    reader: Box<dyn SensorReader>,
    thresholds: Arc<ThresholdTable>,
    polarity: Polarity,
    debouncer: Debouncer,
    dispatcher: Dispatcher,
    mode: SystemMode,
    interval: Duration,
    /// Scratch space for one read of every channel.
    readings: Vec<i32>,
}

impl Poller {
    pub fn new(
        reader: Box<dyn SensorReader>,
        thresholds: Arc<ThresholdTable>,
        polarity: Polarity,
        debounce: Duration,
        dispatcher: Dispatcher,
        mode: SystemMode,
        interval: Duration,
    ) -> Poller {
        let channels = reader.channel_count();
        Poller {
            reader,
            thresholds,
            polarity,
            debouncer: Debouncer::new(channels, debounce),
            dispatcher,
            mode,
            interval,
            readings: vec![0; channels],
        }
    }

    /// Performs one poll at `now`. Returns the number of edges dispatched.
    /// Nothing is read while the system is inactive.
    pub fn poll_once(&mut self, now: Instant) -> usize {
        if !self.mode.is_active() {
            return 0;
        }
        if let Err(e) = self.reader.read(&mut self.readings) {
            warn!(err = %e, "Skipping sensor poll");
            return 0;
        }

        let mut edges = 0;
        for (channel, raw) in self.readings.iter().enumerate() {
            // A channel without a threshold can never be broken.
            let observed = self
                .thresholds
                .get(channel)
                .is_some_and(|threshold| self.polarity.is_broken(*raw, threshold));
            if let Some(edge) = self.debouncer.observe(channel, observed, now) {
                debug!(channel, broken = edge.broken, raw = *raw, "Beam edge");
                self.dispatcher.dispatch(edge);
                edges += 1;
            }
        }
        edges
    }

    /// Polls until shutdown, one poll per interval.
    pub fn run(mut self, shutdown: ShutdownHandle) {
        info!(
            channels = self.readings.len(),
            interval = ?self.interval,
            debounce = ?self.debouncer.window(),
            "Sensor poller started"
        );

        let mut next_tick = Instant::now();
        while !shutdown.is_cancelled() {
            self.poll_once(Instant::now());

            next_tick += self.interval;
            let now = Instant::now();
            if next_tick < now {
                // Fell behind (e.g. the process was suspended); don't burst to catch up.
                next_tick = now;
                continue;
            }
            spin_sleep::sleep(next_tick - now);
        }

        info!("Sensor poller stopped");
    }

    /// Starts the poller on its own thread.
    pub fn spawn(self, shutdown: ShutdownHandle) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("lharp-sensors".into())
            .spawn(move || self.run(shutdown))
    }
}
