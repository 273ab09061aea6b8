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
// Core mixing loop, independent of the output device.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audio::{self, PcmFormat, Sink, SinkError};
use crate::playsync::ShutdownHandle;
use crate::samples::VoiceBank;

/// How often an idle mixer re-checks the system mode.
const IDLE_INTERVAL: Duration = Duration::from_millis(20);

/// The "system active" flag. When cleared the mixer neither reads voices nor writes audio.
#[derive(Clone, Debug)]
pub struct SystemMode {
    active: Arc<AtomicBool>,
}

impl SystemMode {
    pub fn new(active: bool) -> SystemMode {
        SystemMode {
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("voices are {voices} but the output is {output}")]
    EncodingMismatch {
        voices: audio::SampleEncoding,
        output: audio::SampleEncoding,
    },

    #[error("mix blocks must hold at least one frame")]
    EmptyBlock,
}

/// Counters reported when the mixer loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MixStats {
    /// Blocks handed to the sink.
    pub blocks: u64,
    /// Times the mixer went idle because the system was deactivated.
    pub idle_periods: u64,
}

/// Sums every active voice into fixed-size blocks of the output format.
pub struct Mixer {
    voices: Arc<VoiceBank>,
    format: PcmFormat,
    block_frames: usize,
}

impl Mixer {
    pub fn new(
        voices: Arc<VoiceBank>,
        format: PcmFormat,
        block_frames: usize,
    ) -> Result<Mixer, MixerError> {
        if voices.encoding() != format.encoding {
            return Err(MixerError::EncodingMismatch {
                voices: voices.encoding(),
                output: format.encoding,
            });
        }
        if block_frames == 0 {
            return Err(MixerError::EmptyBlock);
        }
        Ok(Mixer {
            voices,
            format,
            block_frames,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Bytes in one mix block.
    pub fn block_bytes(&self) -> usize {
        self.format.block_bytes(self.block_frames)
    }

    /// Mixes one frame: the clipped sum of the current sample of every active voice, centered
    /// around zero. Advances every active voice by one sample.
    #[inline]
    pub fn mix_frame(&self) -> i32 {
        // i32 holds the sum of any realistic number of full-scale 16-bit voices.
        let mut accumulator: i32 = 0;
        for voice in self.voices.iter() {
            if let Some(sample) = voice.next_sample() {
                accumulator += sample;
            }
        }
        let encoding = self.format.encoding;
        accumulator.clamp(encoding.centered_min(), encoding.centered_max())
    }

    /// Fills `block` with as many whole frames as fit, each fanned out to every output channel.
    pub fn mix_block(&self, block: &mut [u8]) {
        let encoding = self.format.encoding;
        let sample_bytes = encoding.bytes_per_sample();
        for frame in block.chunks_exact_mut(self.format.frame_bytes()) {
            let mixed = self.mix_frame();
            for out in frame.chunks_exact_mut(sample_bytes) {
                encoding.encode(mixed, out);
            }
        }
    }

    /// Runs the mixing loop until shutdown or a sink failure.
    ///
    /// The mode and shutdown flags are checked once per block. While the system is inactive no
    /// voice is read and nothing is written; on deactivation the voices are silenced and the sink
    /// is flushed. On exit block production stops first, then the sink is flushed, then closed.
    pub fn run(
        &self,
        sink: &mut dyn Sink,
        mode: &SystemMode,
        shutdown: &ShutdownHandle,
    ) -> Result<MixStats, SinkError> {
        info!(
            sink = sink.to_string(),
            format = self.format.to_string(),
            block_frames = self.block_frames,
            voices = self.voices.len(),
            "Mixer started"
        );

        let mut block = vec![0u8; self.block_bytes()];
        let mut stats = MixStats::default();
        let mut mixing = false;

        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            if !mode.is_active() {
                if mixing {
                    info!("System inactive, mixer idling");
                    mixing = false;
                    stats.idle_periods += 1;
                    self.voices.stop_all();
                    if let Err(e) = sink.flush() {
                        warn!(err = %e, "Unable to flush sink on deactivation");
                    }
                }
                shutdown.wait_timeout(IDLE_INTERVAL);
                continue;
            }
            if !mixing {
                info!("System active, mixer running");
                mixing = true;
            }

            self.mix_block(&mut block);
            if let Err(e) = audio::write_all(sink, &block) {
                break Err(e);
            }
            stats.blocks += 1;
        };

        if let Err(e) = sink.flush() {
            warn!(err = %e, "Unable to flush sink on mixer exit");
        }
        sink.close();

        match &result {
            Ok(()) => info!(blocks = stats.blocks, "Mixer stopped"),
            Err(e) => error!(err = %e, blocks = stats.blocks, "Mixer stopped on sink error"),
        }
        result.map(|()| stats)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::audio::{mock, SampleEncoding};
    use crate::testutil::eventually;

    fn u8_mixer(buffers: Vec<Vec<u8>>, block_frames: usize) -> (Mixer, Arc<VoiceBank>) {
        let voices = Arc::new(VoiceBank::from_buffers(buffers, SampleEncoding::U8));
        let mixer = Mixer::new(voices.clone(), PcmFormat::default(), block_frames).unwrap();
        (mixer, voices)
    }

    /// Takes the left channel of each stereo u8 frame.
    fn left(block: &[u8]) -> Vec<u8> {
        block.chunks_exact(2).map(|frame| frame[0]).collect()
    }

    #[test]
    fn test_silence_with_no_active_voices() {
        let (mixer, _voices) = u8_mixer(vec![vec![0; 16], vec![255; 16]], 8);
        let mut block = vec![0u8; mixer.block_bytes()];

        for _ in 0..3 {
            mixer.mix_block(&mut block);
            assert!(block.iter().all(|b| *b == 128));
        }
    }

    #[test]
    fn test_single_voice_plays_then_goes_silent() {
        let (mixer, voices) = u8_mixer(vec![vec![10, 20, 30, 128]], 8);
        voices.trigger(0);

        let mut block = vec![0u8; mixer.block_bytes()];
        mixer.mix_block(&mut block);

        assert_eq!(left(&block), vec![10, 20, 30, 128, 128, 128, 128, 128]);
        // Mono fanned out identically to both channels.
        for frame in block.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(!voices.is_active(0));
        assert_eq!(voices.voice(0).unwrap().cursor(), 4);
    }

    #[test]
    fn test_voice_deactivates_exactly_after_last_frame() {
        let (mixer, voices) = u8_mixer(vec![vec![10, 20, 30, 128]], 1);
        voices.trigger(0);

        let mut block = vec![0u8; mixer.block_bytes()];
        for expected in [10u8, 20, 30] {
            mixer.mix_block(&mut block);
            assert_eq!(block, vec![expected, expected]);
            assert!(voices.is_active(0));
        }
        mixer.mix_block(&mut block);
        assert_eq!(block, vec![128, 128]);
        assert!(!voices.is_active(0));
    }

    #[test]
    fn test_sum_clips_instead_of_wrapping() {
        // +100 centered each.
        let (mixer, voices) = u8_mixer(vec![vec![228; 2], vec![228; 2]], 1);
        voices.trigger(0);
        voices.trigger(1);
        assert_eq!(mixer.mix_frame(), 127);

        let (mixer, voices) = u8_mixer(vec![vec![28; 2], vec![28; 2]], 1);
        voices.trigger(0);
        voices.trigger(1);
        assert_eq!(mixer.mix_frame(), -128);

        let mut block = vec![0u8; 2];
        mixer.mix_block(&mut block);
        assert_eq!(block, vec![0, 0]);
    }

    #[test]
    fn test_clipping_happens_after_summation() {
        // +127 +127 -128: clipping the running sum would give -1.
        let (mixer, voices) = u8_mixer(vec![vec![255], vec![255], vec![0]], 1);
        voices.trigger(0);
        voices.trigger(1);
        voices.trigger(2);
        assert_eq!(mixer.mix_frame(), 126);

        let (mixer, voices) = u8_mixer(vec![vec![255], vec![0]], 1);
        voices.trigger(0);
        voices.trigger(1);
        assert_eq!(mixer.mix_frame(), -1);
    }

    #[test]
    fn test_s16_mixing() {
        let mut a = Vec::new();
        a.extend_from_slice(&30_000i16.to_le_bytes());
        a.extend_from_slice(&(-5i16).to_le_bytes());
        let b = 10_000i16.to_le_bytes().to_vec();
        let voices = Arc::new(VoiceBank::from_buffers(vec![a, b], SampleEncoding::S16));
        let format = PcmFormat::new(44100, SampleEncoding::S16, 1).unwrap();
        let mixer = Mixer::new(voices.clone(), format, 3).unwrap();
        voices.trigger(0);
        voices.trigger(1);

        let mut block = vec![0u8; mixer.block_bytes()];
        mixer.mix_block(&mut block);
        let samples: Vec<i16> = block
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![i16::MAX, -5, 0]);
    }

    #[test]
    fn test_cursor_invariant_holds_after_every_block() {
        let (mixer, voices) = u8_mixer(vec![vec![1; 3], vec![2; 7], vec![3; 16], vec![4; 1]], 4);
        for channel in 0..voices.len() {
            voices.trigger(channel);
        }

        let mut block = vec![0u8; mixer.block_bytes()];
        for _ in 0..6 {
            mixer.mix_block(&mut block);
            for voice in voices.iter() {
                let state = voice.state();
                assert!(state.cursor <= voice.len());
                if state.cursor == voice.len() {
                    assert!(!state.active);
                }
            }
        }
        assert_eq!(voices.active_count(), 0);
    }

    #[test]
    fn test_retrigger_mid_block_restarts_note() {
        let (mixer, voices) = u8_mixer(vec![vec![10, 20, 30, 40, 50, 60]], 3);
        voices.trigger(0);

        let mut block = vec![0u8; mixer.block_bytes()];
        mixer.mix_block(&mut block);
        assert_eq!(left(&block), vec![10, 20, 30]);

        voices.trigger(0);
        mixer.mix_block(&mut block);
        assert_eq!(left(&block), vec![10, 20, 30]);
    }

    #[test]
    fn test_concurrent_triggers_keep_voices_consistent() {
        let (mixer, voices) = u8_mixer(vec![vec![1; 50]; 4], 32);
        let done = Arc::new(AtomicBool::new(false));

        let triggers = {
            let voices = voices.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut n = 0;
                while !done.load(Ordering::Relaxed) {
                    voices.trigger(n % 4);
                    n += 1;
                }
            })
        };

        let mut block = vec![0u8; mixer.block_bytes()];
        for _ in 0..2000 {
            mixer.mix_block(&mut block);
            for voice in voices.iter() {
                assert!(voice.cursor() <= voice.len());
            }
        }
        done.store(true, Ordering::Relaxed);
        triggers.join().unwrap();

        // The last trigger always wins.
        voices.trigger(2);
        let state = voices.voice(2).unwrap().state();
        assert!(state.active);
        assert_eq!(state.cursor, 0);
    }

    #[test]
    fn test_trigger_during_block_never_tears() {
        // Channel 2 ramps 129..=228 so every frame says exactly which sample it came from.
        let note: Vec<u8> = (129..=228).collect();
        for _ in 0..20 {
            let (mixer, voices) = u8_mixer(vec![vec![128; 4], vec![128; 4], note.clone()], 4096);
            voices.trigger(2);
            let mut block = vec![0u8; mixer.block_bytes()];
            mixer.mix_block(&mut block);
            assert!(!voices.is_active(2));

            let trigger = {
                let voices = voices.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_micros(50));
                    voices.trigger(2);
                })
            };
            mixer.mix_block(&mut block);
            trigger.join().unwrap();

            // Silence from the finished note, then the new note from its first sample in order,
            // then silence again.
            let frames = left(&block);
            let start = frames.iter().position(|b| *b != 128).unwrap_or(frames.len());
            let played = &frames[start..(start + note.len()).min(frames.len())];
            assert_eq!(played, &note[..played.len()]);
            assert!(frames[start + played.len()..].iter().all(|b| *b == 128));
        }
    }

    #[test]
    fn test_encoding_mismatch_rejected() {
        let voices = Arc::new(VoiceBank::from_buffers(vec![vec![0]], SampleEncoding::U8));
        let format = PcmFormat::new(22050, SampleEncoding::S16, 2).unwrap();
        assert!(matches!(
            Mixer::new(voices.clone(), format, 64),
            Err(MixerError::EncodingMismatch { .. })
        ));
        assert!(matches!(
            Mixer::new(voices, PcmFormat::default(), 0),
            Err(MixerError::EmptyBlock)
        ));
    }

    #[test]
    fn test_run_writes_blocks_and_flushes_before_close() {
        let (mixer, voices) = u8_mixer(vec![vec![10, 20, 30, 128]], 4);
        let mut sink = mock::Sink::new("mock", PcmFormat::default()).paced_recording();
        let handle = sink.handle();
        let mode = SystemMode::new(true);
        let shutdown = ShutdownHandle::new();
        voices.trigger(0);

        let runner = {
            let shutdown = shutdown.clone();
            thread::spawn(move || mixer.run(&mut sink, &mode, &shutdown))
        };

        eventually(|| handle.accepted_bytes() >= 16, "mixer never wrote");
        shutdown.cancel();
        let stats = runner.join().unwrap().unwrap();

        let recorded = handle.recorded();
        assert_eq!(recorded.len() as u64, stats.blocks * 8);
        assert_eq!(&recorded[..8], &[10, 10, 20, 20, 30, 30, 128, 128]);
        assert!(recorded[8..].iter().all(|b| *b == 128));
        assert_eq!(handle.flushes(), 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_run_gates_on_system_mode() {
        let (mixer, voices) = u8_mixer(vec![vec![200; 4096]], 16);
        let sink = mock::Sink::new("mock", PcmFormat::default()).paced_recording();
        let handle = sink.handle();
        let mode = SystemMode::new(false);
        let shutdown = ShutdownHandle::new();

        let runner = {
            let mode = mode.clone();
            let shutdown = shutdown.clone();
            let mut sink = sink;
            thread::spawn(move || mixer.run(&mut sink, &mode, &shutdown))
        };

        // Inactive: nothing is read or written.
        voices.trigger(0);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(handle.write_calls(), 0);
        assert_eq!(voices.voice(0).unwrap().cursor(), 0);

        mode.set_active(true);
        eventually(|| handle.write_calls() > 0, "mixer never resumed");

        mode.set_active(false);
        eventually(|| handle.flushes() == 1, "mixer never flushed on deactivation");
        assert!(!voices.is_active(0));

        shutdown.cancel();
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats.idle_periods, 1);
        assert_eq!(handle.flushes(), 2);
    }

    #[test]
    fn test_failed_flush_on_deactivation_keeps_mixer_alive() {
        let (mixer, voices) = u8_mixer(vec![vec![200; 4096]], 16);
        let sink = mock::Sink::new("mock", PcmFormat::default())
            .paced_recording()
            .stall_flushes();
        let handle = sink.handle();
        let mode = SystemMode::new(true);
        let shutdown = ShutdownHandle::new();

        let runner = {
            let mode = mode.clone();
            let shutdown = shutdown.clone();
            let mut sink = sink;
            thread::spawn(move || mixer.run(&mut sink, &mode, &shutdown))
        };

        eventually(|| handle.write_calls() > 0, "mixer never started");
        mode.set_active(false);
        eventually(|| handle.flushes() == 1, "mixer never flushed on deactivation");
        assert!(!runner.is_finished());

        // Reactivating resumes output.
        let written = handle.write_calls();
        voices.trigger(0);
        mode.set_active(true);
        eventually(
            || handle.write_calls() > written,
            "mixer never resumed after a failed flush",
        );

        shutdown.cancel();
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats.idle_periods, 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_run_stops_on_sink_error() {
        let (mixer, _voices) = u8_mixer(vec![vec![0]], 4);
        let mut sink = mock::Sink::new("mock", PcmFormat::default());
        audio::Sink::close(&mut sink);

        let result = mixer.run(&mut sink, &SystemMode::new(true), &ShutdownHandle::new());
        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
