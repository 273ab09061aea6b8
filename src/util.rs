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

use std::path::Path;
use std::time::Duration;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs a note length in a seconds.milliseconds format.
pub fn duration_seconds_millis(duration: Duration) -> String {
    format!("{}.{:03}s", duration.as_secs(), duration.subsec_millis())
}

/// Formats a byte count with a binary unit suffix.
pub fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::time::Duration;

    use crate::util::{duration_seconds_millis, filename_display, human_bytes};

    #[test]
    fn test_duration_seconds_millis() {
        assert_eq!("0.000s", duration_seconds_millis(Duration::ZERO));
        assert_eq!("0.045s", duration_seconds_millis(Duration::from_millis(45)));
        assert_eq!("1.250s", duration_seconds_millis(Duration::from_millis(1250)));
        assert_eq!("62.001s", duration_seconds_millis(Duration::from_millis(62001)));
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!("0 B", human_bytes(0));
        assert_eq!("1023 B", human_bytes(1023));
        assert_eq!("1.0 KiB", human_bytes(1024));
        assert_eq!("1.5 MiB", human_bytes(1024 * 1024 * 3 / 2));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!("c.wav", filename_display(Path::new("/notes/c.wav")));
        assert_eq!("unreadable file name", filename_display(Path::new("/")));
    }
}
