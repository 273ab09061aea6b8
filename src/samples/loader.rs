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

//! Loads note samples from WAV files into memory.
//!
//! All notes are read up front so that playback never touches storage. Every file must be mono,
//! integer PCM in the configured encoding, and all files must share one sample rate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::voice::{Voice, VoiceBank};
use crate::audio::SampleEncoding;

/// Load-time failures. Any of these keeps the harp from starting.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to read {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{path} has {channels} channels, notes must be mono")]
    NotMono { path: PathBuf, channels: u16 },

    #[error("{path} is {bits}-bit {kind}, only 8-bit and 16-bit integer PCM is supported")]
    UnsupportedFormat {
        path: PathBuf,
        bits: u16,
        kind: &'static str,
    },

    #[error("{path} is {found}, expected {expected}")]
    EncodingMismatch {
        path: PathBuf,
        expected: SampleEncoding,
        found: SampleEncoding,
    },

    #[error("{path} is {found}Hz, expected {expected}Hz")]
    SampleRateMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("{path} contains no samples")]
    Empty { path: PathBuf },

    #[error("no notes configured")]
    NoNotes,
}

/// A note read into memory.
#[derive(Clone)]
pub struct LoadedSample {
    path: PathBuf,
    /// Raw mono PCM in `encoding`.
    data: Arc<[u8]>,
    encoding: SampleEncoding,
    sample_rate: u32,
}

impl LoadedSample {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len() / self.encoding.bytes_per_sample()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length at the file's sample rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    /// Creates an idle voice over this sample's data.
    pub fn voice(&self) -> Voice {
        Voice::new(self.data.clone(), self.encoding)
    }
}

fn wav_error(path: &Path) -> impl FnOnce(hound::Error) -> LoadError + '_ {
    move |source| LoadError::Wav {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads one WAV file into raw PCM.
pub fn load_wav(path: &Path) -> Result<LoadedSample, LoadError> {
    let reader = hound::WavReader::open(path).map_err(wav_error(path))?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(LoadError::NotMono {
            path: path.to_path_buf(),
            channels: spec.channels,
        });
    }
    let encoding = match (spec.sample_format, SampleEncoding::from_bits(spec.bits_per_sample)) {
        (hound::SampleFormat::Int, Some(encoding)) => encoding,
        (format, _) => {
            return Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
                bits: spec.bits_per_sample,
                kind: if format == hound::SampleFormat::Float {
                    "float"
                } else {
                    "integer"
                },
            })
        }
    };

    let mut data = Vec::with_capacity(reader.len() as usize * encoding.bytes_per_sample());
    match encoding {
        // hound centers 8-bit WAV data around zero; store it back in its unsigned form.
        SampleEncoding::U8 => {
            for sample in reader.into_samples::<i8>() {
                let sample = sample.map_err(wav_error(path))?;
                data.push((sample as i16 + 128) as u8);
            }
        }
        SampleEncoding::S16 => {
            for sample in reader.into_samples::<i16>() {
                let sample = sample.map_err(wav_error(path))?;
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    if data.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(LoadedSample {
        path: path.to_path_buf(),
        data: Arc::from(data),
        encoding,
        sample_rate: spec.sample_rate,
    })
}

/// Loads one note per channel and checks that they all share the expected format.
pub fn load_notes(
    paths: &[PathBuf],
    encoding: SampleEncoding,
    sample_rate: u32,
) -> Result<Vec<LoadedSample>, LoadError> {
    if paths.is_empty() {
        return Err(LoadError::NoNotes);
    }

    let mut notes = Vec::with_capacity(paths.len());
    for path in paths {
        info!(path = ?path, "Loading note into memory");
        let note = load_wav(path)?;
        if note.encoding != encoding {
            return Err(LoadError::EncodingMismatch {
                path: path.clone(),
                expected: encoding,
                found: note.encoding,
            });
        }
        if note.sample_rate != sample_rate {
            return Err(LoadError::SampleRateMismatch {
                path: path.clone(),
                expected: sample_rate,
                found: note.sample_rate,
            });
        }
        info!(
            path = ?path,
            samples = note.len(),
            duration = ?note.duration(),
            "Loaded note"
        );
        notes.push(note);
    }
    Ok(notes)
}

/// Loads the notes and builds the voice bank from them.
pub fn load_voice_bank(
    paths: &[PathBuf],
    encoding: SampleEncoding,
    sample_rate: u32,
) -> Result<VoiceBank, LoadError> {
    let notes = load_notes(paths, encoding, sample_rate)?;
    let bank = VoiceBank::new(notes.iter().map(LoadedSample::voice).collect(), encoding)
        .ok_or(LoadError::NoNotes)?;
    info!(
        voices = bank.len(),
        memory_bytes = bank.memory_size(),
        "Voice bank ready"
    );
    Ok(bank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_load_u8_wav_round_trips_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_wav::<i8>(&path, &[-118, -108, -98, 0], 22050, 1).unwrap();

        let note = load_wav(&path).unwrap();
        assert_eq!(note.encoding(), SampleEncoding::U8);
        assert_eq!(note.sample_rate(), 22050);
        assert_eq!(note.len(), 4);

        let voice = note.voice();
        voice.trigger();
        let played: Vec<i32> = std::iter::from_fn(|| voice.next_sample()).collect();
        assert_eq!(played, vec![-118, -108, -98, 0]);
    }

    #[test]
    fn test_load_s16_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.wav");
        write_wav::<i16>(&path, &[1000, -1000], 44100, 1).unwrap();

        let note = load_wav(&path).unwrap();
        assert_eq!(note.encoding(), SampleEncoding::S16);
        assert_eq!(note.len(), 2);
        assert_eq!(note.duration(), Duration::from_secs_f64(2.0 / 44100.0));
    }

    #[test]
    fn test_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav::<i8>(&path, &[1, 2, 3, 4], 22050, 2).unwrap();

        assert!(matches!(
            load_wav(&path),
            Err(LoadError::NotMono { channels: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_missing_file() {
        assert!(matches!(
            load_wav(Path::new("/definitely/not/here.wav")),
            Err(LoadError::Wav { .. })
        ));
    }

    #[test]
    fn test_load_notes_checks_common_format() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let c = dir.path().join("c.wav");
        write_wav::<i8>(&a, &[1, 2], 22050, 1).unwrap();
        write_wav::<i8>(&b, &[3, 4], 11025, 1).unwrap();
        write_wav::<i16>(&c, &[3, 4], 22050, 1).unwrap();

        assert!(matches!(
            load_notes(&[a.clone(), b], SampleEncoding::U8, 22050),
            Err(LoadError::SampleRateMismatch {
                expected: 22050,
                found: 11025,
                ..
            })
        ));
        assert!(matches!(
            load_notes(&[a.clone(), c], SampleEncoding::U8, 22050),
            Err(LoadError::EncodingMismatch { .. })
        ));
        assert!(matches!(
            load_notes(&[], SampleEncoding::U8, 22050),
            Err(LoadError::NoNotes)
        ));

        let bank = load_voice_bank(&[a.clone(), a], SampleEncoding::U8, 22050).unwrap();
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.memory_size(), 4);
    }
}
