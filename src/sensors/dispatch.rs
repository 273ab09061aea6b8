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
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::Edge;
use crate::samples::VoiceBank;

/// What happens to a ringing note when its beam is restored.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Let the note play to its end.
    #[default]
    #[serde(rename = "ring")]
    Ring,
    /// Silence the note immediately.
    #[serde(rename = "cut")]
    Cut,
}

/// Hands confirmed edges over to the voice bank.
pub struct Dispatcher {
    voices: Arc<VoiceBank>,
    release: ReleasePolicy,
}

impl Dispatcher {
    pub fn new(voices: Arc<VoiceBank>, release: ReleasePolicy) -> Dispatcher {
        Dispatcher { voices, release }
    }

    /// Applies one edge. A broken beam always restarts its note from the top.
    pub fn dispatch(&self, edge: Edge) {
        if edge.broken {
            self.voices.trigger(edge.channel);
            return;
        }

        match self.release {
            ReleasePolicy::Ring => {}
            ReleasePolicy::Cut => {
                debug!(channel = edge.channel, "Beam restored, cutting note");
                self.voices.stop(edge.channel);
            }
        }
    }
}
