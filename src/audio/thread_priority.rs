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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the mixer thread when LHARP_THREAD_PRIORITY is unset.
const DEFAULT_MIXER_THREAD_PRIORITY: u8 = 70;

/// Reads LHARP_THREAD_PRIORITY (0-99), falling back to the default.
pub fn mixer_thread_priority() -> u8 {
    parse_priority(std::env::var("LHARP_THREAD_PRIORITY").ok().as_deref())
}

fn parse_priority(value: Option<&str>) -> u8 {
    value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_MIXER_THREAD_PRIORITY)
}

fn flag_enabled(value: Option<&str>) -> bool {
    value
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the mixer thread.
/// Default: enabled. Opt out with LHARP_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !flag_enabled(std::env::var("LHARP_DISABLE_RT_AUDIO").ok().as_deref())
}

/// Raises the calling thread's priority so that the mixer isn't starved by the sensor poller
/// or anything else on the box. Failures are logged and otherwise ignored.
pub fn promote_mixer_thread() {
    let priority = match ThreadPriorityValue::try_from(mixer_thread_priority()) {
        Ok(priority) => priority,
        Err(e) => {
            warn!(error = ?e, "Invalid mixer thread priority");
            return;
        }
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise mixer thread priority");
    }

    #[cfg(unix)]
    if rt_audio_enabled() {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for mixer thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for mixer thread"),
        }
    }
}
