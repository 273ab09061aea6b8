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
use std::time::{Duration, Instant};

/// A confirmed beam transition on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The sensor channel (and voice) index.
    pub channel: usize,
    /// True when the beam became broken, false when it was restored.
    pub broken: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    /// Most recent raw comparison. May flap freely.
    pending: bool,
    /// Last state that was held stable for longer than the window.
    confirmed: bool,
    /// When `pending` last flipped. None until the first flip.
    last_change: Option<Instant>,
}

/// Turns noisy per-poll beam observations into at most one edge per stable interval.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    channels: Vec<ChannelState>,
}

impl Debouncer {
    /// Creates a debouncer for `channels` channels, all starting unbroken.
    pub fn new(channels: usize, window: Duration) -> Debouncer {
        Debouncer {
            window,
            channels: vec![ChannelState::default(); channels],
        }
    }

    /// Feeds one observation for `channel` taken at `now`. Returns an edge when the observed
    /// state has been stable for longer than the window and differs from the confirmed state.
    pub fn observe(&mut self, channel: usize, observed: bool, now: Instant) -> Option<Edge> {
        let state = self.channels.get_mut(channel)?;

        if observed != state.pending {
            state.pending = observed;
            state.last_change = Some(now);
        }

        let stable_for = state
            .last_change
            .map(|changed| now.saturating_duration_since(changed))?;
        if stable_for > self.window && state.pending != state.confirmed {
            state.confirmed = state.pending;
            return Some(Edge {
                channel,
                broken: state.confirmed,
            });
        }
        None
    }

    /// The confirmed (debounced) state of `channel`.
    #[cfg(test)]
    pub fn is_broken(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|s| s.confirmed)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
