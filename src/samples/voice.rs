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

//! Per-channel voices shared between the sensor poller and the mixer.
//!
//! Each voice packs its active flag and playback cursor into a single atomic word. A trigger
//! replaces the whole word, and the mixer only advances it with a compare-and-swap, so a read
//! always sees one consistent {active, cursor} pair and a retrigger can never be lost to a
//! concurrent natural finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::SampleEncoding;

/// High bit of the state word: the voice contributes to the mix.
const ACTIVE: usize = 1 << (usize::BITS - 1);

/// Remaining bits of the state word: the playback cursor, in samples.
const CURSOR_MASK: usize = !ACTIVE;

/// A consistent snapshot of a voice's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceState {
    pub active: bool,
    pub cursor: usize,
}

impl VoiceState {
    fn unpack(word: usize) -> VoiceState {
        VoiceState {
            active: word & ACTIVE != 0,
            cursor: word & CURSOR_MASK,
        }
    }
}

/// One pre-loaded note plus its playback state.
pub struct Voice {
    /// Raw mono PCM. Never mutated after load.
    data: Arc<[u8]>,
    /// Encoding of `data`.
    encoding: SampleEncoding,
    /// Number of playable samples in `data`.
    len: usize,
    /// Packed active flag and cursor.
    state: AtomicUsize,
}

impl Voice {
    /// Creates an idle voice over the given sample data. A trailing partial sample is ignored.
    pub fn new(data: Arc<[u8]>, encoding: SampleEncoding) -> Voice {
        let len = (data.len() / encoding.bytes_per_sample()).min(CURSOR_MASK);
        Voice {
            data,
            encoding,
            len,
            state: AtomicUsize::new(0),
        }
    }

    /// Restarts the note from the beginning, whether or not it is already playing.
    /// An empty voice has nothing to play and stays idle.
    pub fn trigger(&self) {
        if self.len == 0 {
            return;
        }
        self.state.store(ACTIVE, Ordering::Release);
    }

    /// Silences the voice, leaving its cursor where it was.
    pub fn stop(&self) {
        self.state.fetch_and(CURSOR_MASK, Ordering::AcqRel);
    }

    /// Returns true while the voice contributes to the mix.
    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Current playback position, in samples.
    pub fn cursor(&self) -> usize {
        self.state().cursor
    }

    /// A consistent snapshot of the voice's state.
    pub fn state(&self) -> VoiceState {
        VoiceState::unpack(self.state.load(Ordering::Acquire))
    }

    /// Number of playable samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the voice has nothing to play.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Reads the sample under the cursor and advances past it. Only the mixer calls this.
    ///
    /// Returns None for an inactive voice. The voice deactivates on the same step that consumes
    /// its last sample. If a trigger lands between the read and the advance, the trigger wins
    /// and the sample already read is the last one of the old note.
    #[inline]
    pub(crate) fn next_sample(&self) -> Option<i32> {
        let word = self.state.load(Ordering::Acquire);
        if word & ACTIVE == 0 {
            return None;
        }
        let cursor = word & CURSOR_MASK;

        let sample = if cursor < self.len {
            self.encoding.decode(&self.data, cursor)
        } else {
            None
        };
        let Some(sample) = sample else {
            // Unreachable while the invariant holds; park the voice at its end.
            let _ = self
                .state
                .compare_exchange(word, self.len, Ordering::AcqRel, Ordering::Acquire);
            return None;
        };

        let next = cursor + 1;
        let advanced = if next >= self.len { next } else { next | ACTIVE };
        let _ = self
            .state
            .compare_exchange(word, advanced, Ordering::AcqRel, Ordering::Acquire);
        Some(sample)
    }

    /// Forces the state word, bypassing the trigger/advance discipline. Test only.
    #[cfg(test)]
    pub(crate) fn force_state(&self, active: bool, cursor: usize) {
        let word = cursor | if active { ACTIVE } else { 0 };
        self.state.store(word, Ordering::Release);
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Voice")
            .field("len", &self.len)
            .field("encoding", &self.encoding)
            .field("active", &state.active)
            .field("cursor", &state.cursor)
            .finish()
    }
}

/// A fixed set of voices, one per sensor channel, all sharing one encoding.
pub struct VoiceBank {
    voices: Box<[Voice]>,
    encoding: SampleEncoding,
}

impl VoiceBank {
    /// Builds a bank from raw PCM buffers, one per channel.
    pub fn from_buffers(buffers: Vec<Vec<u8>>, encoding: SampleEncoding) -> VoiceBank {
        VoiceBank {
            voices: buffers
                .into_iter()
                .map(|buffer| Voice::new(Arc::from(buffer), encoding))
                .collect(),
            encoding,
        }
    }

    /// Builds a bank from already constructed voices. Returns None if their encodings differ.
    pub fn new(voices: Vec<Voice>, encoding: SampleEncoding) -> Option<VoiceBank> {
        if voices.iter().any(|v| v.encoding() != encoding) {
            return None;
        }
        Some(VoiceBank {
            voices: voices.into_boxed_slice(),
            encoding,
        })
    }

    /// Restarts voice `channel`. Returns false for an unknown channel.
    pub fn trigger(&self, channel: usize) -> bool {
        match self.voices.get(channel) {
            Some(voice) => {
                voice.trigger();
                debug!(channel, "Voice triggered");
                true
            }
            None => {
                warn!(channel, voices = self.voices.len(), "Trigger for unknown voice");
                false
            }
        }
    }

    /// Silences voice `channel`. Returns false for an unknown channel.
    pub fn stop(&self, channel: usize) -> bool {
        match self.voices.get(channel) {
            Some(voice) => {
                voice.stop();
                true
            }
            None => false,
        }
    }

    /// Returns true if voice `channel` exists and is playing.
    pub fn is_active(&self, channel: usize) -> bool {
        self.voices.get(channel).is_some_and(Voice::is_active)
    }

    /// Silences every voice.
    pub fn stop_all(&self) {
        self.voices.iter().for_each(Voice::stop);
    }

    /// Number of voices currently playing.
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn voice(&self, channel: usize) -> Option<&Voice> {
        self.voices.get(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    /// Number of voices (and sensor channels).
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Total sample memory held by the bank, in bytes.
    pub fn memory_size(&self) -> usize {
        self.voices.iter().map(|v| v.data.len()).sum()
    }
}

impl std::fmt::Debug for VoiceBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBank")
            .field("voices", &self.voices.len())
            .field("active_voices", &self.active_count())
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_voice(data: &[u8]) -> Voice {
        Voice::new(Arc::from(data.to_vec()), SampleEncoding::U8)
    }

    #[test]
    fn test_new_voice_is_idle() {
        let voice = u8_voice(&[10, 20, 30]);
        assert!(!voice.is_active());
        assert_eq!(voice.cursor(), 0);
        assert_eq!(voice.len(), 3);
        assert_eq!(voice.next_sample(), None);
    }

    #[test]
    fn test_s16_length_counts_samples() {
        let voice = Voice::new(Arc::from(vec![0u8; 9]), SampleEncoding::S16);
        assert_eq!(voice.len(), 4);
    }

    #[test]
    fn test_playback_deactivates_on_last_sample() {
        let voice = u8_voice(&[10, 20, 128]);
        voice.trigger();

        assert_eq!(voice.next_sample(), Some(-118));
        assert_eq!(voice.next_sample(), Some(-108));
        assert!(voice.is_active());
        assert_eq!(voice.next_sample(), Some(0));

        // Deactivated in the same step that consumed the last sample.
        assert_eq!(
            voice.state(),
            VoiceState {
                active: false,
                cursor: 3
            }
        );
        assert_eq!(voice.next_sample(), None);
    }

    #[test]
    fn test_retrigger_restarts_instead_of_layering() {
        let voice = u8_voice(&[1, 2, 3, 4, 5]);
        voice.trigger();
        let mut cursors = Vec::new();
        for _ in 0..3 {
            voice.next_sample();
            cursors.push(voice.cursor());
        }
        voice.trigger();
        for _ in 0..2 {
            voice.next_sample();
            cursors.push(voice.cursor());
        }

        assert_eq!(cursors, vec![1, 2, 3, 1, 2]);
        assert!(voice.is_active());
    }

    #[test]
    fn test_out_of_bounds_cursor_is_deactivated() {
        let voice = u8_voice(&[1, 2]);
        voice.force_state(true, 7);

        assert_eq!(voice.next_sample(), None);
        assert_eq!(
            voice.state(),
            VoiceState {
                active: false,
                cursor: 2
            }
        );
    }

    #[test]
    fn test_empty_voice_never_plays() {
        let voice = u8_voice(&[]);
        voice.trigger();
        // Idle straight away, before any mixing could park it.
        assert_eq!(
            voice.state(),
            VoiceState {
                active: false,
                cursor: 0
            }
        );
        assert_eq!(voice.next_sample(), None);
        assert!(!voice.is_active());
        assert!(voice.is_empty());
    }

    #[test]
    fn test_bank_empty_voice_is_never_counted_active() {
        let bank = VoiceBank::from_buffers(vec![vec![], vec![1, 2]], SampleEncoding::U8);
        assert!(bank.trigger(0));
        assert!(!bank.is_active(0));
        assert_eq!(bank.active_count(), 0);

        // A lone odd byte is a partial S16 sample, so that voice is empty too.
        let bank = VoiceBank::from_buffers(vec![vec![7]], SampleEncoding::S16);
        bank.trigger(0);
        assert!(!bank.is_active(0));
    }

    #[test]
    fn test_stop_keeps_cursor() {
        let voice = u8_voice(&[1, 2, 3]);
        voice.trigger();
        voice.next_sample();
        voice.stop();
        assert_eq!(
            voice.state(),
            VoiceState {
                active: false,
                cursor: 1
            }
        );
    }

    #[test]
    fn test_bank_trigger_and_bounds() {
        let bank = VoiceBank::from_buffers(vec![vec![1, 2], vec![3, 4]], SampleEncoding::U8);
        assert_eq!(bank.len(), 2);
        assert!(bank.trigger(1));
        assert!(bank.is_active(1));
        assert!(!bank.is_active(0));
        assert_eq!(bank.active_count(), 1);

        assert!(!bank.trigger(5));
        assert!(!bank.is_active(5));

        bank.stop_all();
        assert_eq!(bank.active_count(), 0);
        assert_eq!(bank.memory_size(), 4);
    }

    #[test]
    fn test_bank_rejects_mixed_encodings() {
        let voices = vec![
            u8_voice(&[1]),
            Voice::new(Arc::from(vec![0u8, 0]), SampleEncoding::S16),
        ];
        assert!(VoiceBank::new(voices, SampleEncoding::U8).is_none());
    }
}
