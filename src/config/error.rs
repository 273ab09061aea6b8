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

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from validation errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid duration {value:?} for {field}: {reason}")]
    Duration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid audio format: {0}")]
    Format(String),

    #[error("block_frames must be between 1 and {max}, got {value}")]
    BlockFrames { value: usize, max: usize },

    #[error("latency_ms must be between 1 and {max}, got {value}")]
    Latency { value: u64, max: u64 },

    #[error("no voices configured")]
    NoVoices,

    #[error("{thresholds} thresholds configured for {voices} voices")]
    ThresholdCount { thresholds: usize, voices: usize },
}
