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
use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lharp::harp::Harp;
use lharp::keyboard::Driver;
use lharp::sensors::SimulatedSensors;
use lharp::util::{duration_seconds_millis, filename_display, human_bytes};
use lharp::{audio, config, samples};

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=laser harp

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/lharp
ExecStart=/usr/local/bin/lharp start "$LHARP_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=lharp.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A laser harp: beam breaks trigger pre-recorded notes."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Loads and checks every note in the given harp configuration.
    Verify {
        /// The path to the harp configuration file.
        config_path: String,
    },
    /// Starts the harp with keyboard-simulated beams.
    Start {
        /// The path to the harp configuration file.
        config_path: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { config_path } => {
            let config = config::Harp::deserialize(&PathBuf::from(&config_path))?;
            let settings = config.settings()?;
            let format = config.audio().format()?;
            let notes = samples::load_notes(
                &config.voice_paths(),
                format.encoding,
                format.sample_rate,
            )?;

            println!("Output: {} on {}", format, config.audio().device());
            println!("Notes (count: {}):", notes.len());
            let mut memory = 0;
            for (channel, note) in notes.iter().enumerate() {
                memory += note.len() * note.encoding().bytes_per_sample();
                println!(
                    "- {}: {} ({} samples, {}, threshold {})",
                    channel + 1,
                    filename_display(note.path()),
                    note.len(),
                    duration_seconds_millis(note.duration()),
                    settings.thresholds[channel],
                );
            }
            println!("Sample memory: {}", human_bytes(memory));
        }
        Commands::Start { config_path } => {
            let config = config::Harp::deserialize(&PathBuf::from(&config_path))?;
            let settings = config.settings()?;
            let format = config.audio().format()?;
            let voices = samples::load_voice_bank(
                &config.voice_paths(),
                format.encoding,
                format.sample_rate,
            )?;
            let sink = audio::get_sink(config.audio())?;

            let (sensors, beams) = SimulatedSensors::new(&Driver::idle_levels(
                settings.polarity,
                &settings.thresholds,
            ));
            // Long enough for the debouncer to accept the pluck.
            let hold = settings.debounce + settings.poll_interval * 4;
            let driver = Driver::new(beams, settings.polarity, hold);

            let mut harp = Harp::start(settings, voices, sink, Box::new(sensors))?;
            driver.run(&harp)?;
            harp.stop()?;
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
