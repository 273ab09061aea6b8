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
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, span, warn, Level};

use crate::harp::Harp;
use crate::sensors::{Polarity, SimulatedHandle};

const ON: &str = "on";
const OFF: &str = "off";
const HOLD: &str = "hold";
const RELEASE: &str = "release";
const THRESHOLD: &str = "t";
const STATUS: &str = "status";
const QUIT: &str = "quit";

/// How far from the threshold simulated readings sit.
const LEVEL_MARGIN: i32 = 100;

/// How often a waiting prompt checks whether the harp has stopped.
const FINISHED_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A command typed at the keyboard. Channels are 1-indexed at the prompt and 0-indexed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Break a beam briefly.
    Pluck(usize),
    /// Break a beam until released.
    Hold(usize),
    /// Restore a held beam.
    Release(usize),
    /// Activate the system.
    On,
    /// Deactivate the system.
    Off,
    /// Change a channel's threshold.
    Threshold(usize, i32),
    /// Print the state of every channel.
    Status,
    /// Stop the harp.
    Quit,
}

fn parse_channel(s: &str) -> Option<usize> {
    s.parse::<usize>().ok()?.checked_sub(1)
}

impl Command {
    /// Parses one line of input. Returns None for anything unrecognized.
    pub fn parse(input: &str) -> Option<Command> {
        let input = input.trim().to_lowercase();
        let words: Vec<&str> = input.split_whitespace().collect();
        match words.as_slice() {
            [ON] => Some(Command::On),
            [OFF] => Some(Command::Off),
            [STATUS] => Some(Command::Status),
            [QUIT] | ["q"] => Some(Command::Quit),
            [HOLD, channel] => parse_channel(channel).map(Command::Hold),
            [RELEASE, channel] => parse_channel(channel).map(Command::Release),
            [THRESHOLD, channel, value] => {
                Some(Command::Threshold(parse_channel(channel)?, value.parse().ok()?))
            }
            [channel] => parse_channel(channel).map(Command::Pluck),
            _ => None,
        }
    }
}

/// Drives a harp with simulated sensors from the keyboard.
pub struct Driver {
    beams: SimulatedHandle,
    polarity: Polarity,
    /// How long a pluck keeps its beam broken.
    hold: Duration,
}

impl Driver {
    pub fn new(beams: SimulatedHandle, polarity: Polarity, hold: Duration) -> Driver {
        Driver {
            beams,
            polarity,
            hold,
        }
    }

    /// Idle sensor readings for the given thresholds.
    pub fn idle_levels(polarity: Polarity, thresholds: &[i32]) -> Vec<i32> {
        thresholds
            .iter()
            .map(|threshold| polarity.levels_around(*threshold, LEVEL_MARGIN).0)
            .collect()
    }

    fn broken_level(&self, harp: &Harp, channel: usize) -> Option<i32> {
        let threshold = harp.thresholds().get(channel)?;
        Some(self.polarity.levels_around(threshold, LEVEL_MARGIN).1)
    }

    /// Applies one command. Returns false once the user asked to quit.
    pub fn apply<W: io::Write>(
        &self,
        harp: &Harp,
        command: Command,
        mut writer: W,
    ) -> Result<bool, io::Error> {
        let applied = match command {
            Command::Pluck(channel) => self
                .broken_level(harp, channel)
                .is_some_and(|level| self.beams.pluck(channel, level, self.hold)),
            Command::Hold(channel) => self
                .broken_level(harp, channel)
                .is_some_and(|level| self.beams.set(channel, level)),
            Command::Release(channel) => self.beams.release(channel),
            Command::On => {
                harp.set_active(true);
                true
            }
            Command::Off => {
                harp.set_active(false);
                true
            }
            Command::Threshold(channel, value) => harp.thresholds().set(channel, value),
            Command::Status => {
                writeln!(
                    writer,
                    "System {}",
                    if harp.is_system_active() { ON } else { OFF }
                )?;
                for (channel, threshold) in harp.thresholds().snapshot().iter().enumerate() {
                    writeln!(
                        writer,
                        "  {}: threshold {}, {}",
                        channel + 1,
                        threshold,
                        if harp.is_active(channel) {
                            "playing"
                        } else {
                            "idle"
                        }
                    )?;
                }
                true
            }
            Command::Quit => return Ok(false),
        };

        if !applied {
            writeln!(writer, "No such channel.")?;
        }
        Ok(true)
    }

    fn prompt<W: io::Write>(&self, harp: &Harp, writer: &mut W) -> Result<(), io::Error> {
        write!(
            writer,
            "Command (1-{}, {} <n>, {} <n>, {} <n> <value>, {}, {}, {}, {}): ",
            harp.voices().len(),
            HOLD,
            RELEASE,
            THRESHOLD,
            ON,
            OFF,
            STATUS,
            QUIT,
        )?;
        writer.flush()
    }

    /// Parses and applies one line of input. Returns false once the user asked to quit.
    fn handle_line<W: io::Write>(
        &self,
        harp: &Harp,
        input: &str,
        writer: W,
    ) -> Result<bool, io::Error> {
        match Command::parse(input) {
            Some(command) => self.apply(harp, command, writer),
            None => {
                warn!(input = input.trim(), "Unrecognized input");
                Ok(true)
            }
        }
    }

    /// Serves commands from `reader` until quit, EOF, or the harp stops on its own. Input is
    /// read on its own thread so a stopped harp is noticed while the prompt waits.
    fn monitor_io<R, W>(&self, harp: &Harp, reader: R, mut writer: W) -> Result<(), io::Error>
    where
        R: io::BufRead + Send + 'static,
        W: io::Write,
    {
        let lines = spawn_reader(reader)?;
        self.prompt(harp, &mut writer)?;
        loop {
            match lines.recv_timeout(FINISHED_CHECK_INTERVAL) {
                Ok(input) => {
                    if !self.handle_line(harp, &input?, &mut writer)? {
                        return Ok(());
                    }
                    self.prompt(harp, &mut writer)?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if harp.is_finished() {
                        warn!("Harp stopped while waiting for input");
                        writeln!(writer)?;
                        writeln!(writer, "Harp stopped.")?;
                        return Ok(());
                    }
                }
                // EOF
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Reads commands from stdin until quit, EOF, or the harp stops on its own.
    pub fn run(&self, harp: &Harp) -> Result<(), io::Error> {
        let span = span!(Level::INFO, "keyboard driver");
        let _enter = span.enter();

        info!("Keyboard driver started.");
        self.monitor_io(harp, io::BufReader::new(io::stdin()), io::stdout())
    }
}

/// Forwards lines from `reader` until EOF, a read error, or the receiver going away.
fn spawn_reader<R>(mut reader: R) -> Result<Receiver<Result<String, io::Error>>, io::Error>
where
    R: io::BufRead + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("lharp-keyboard".into())
        .spawn(move || loop {
            let mut input = String::default();
            match reader.read_line(&mut input) {
                Ok(0) => return,
                Ok(_) => {
                    if tx.send(Ok(input)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        })?;
    Ok(rx)
}
