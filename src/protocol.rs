//! Line protocol of the mmWave presence sensor
//!
//! The sensor emits one `\n` terminated ASCII sentence per reading:
//! `$JYBSS,<0|1>,<field>,<field>,*`. Only the flag at index 1 matters,
//! `"1"` means presence. Other sentences (command echoes, banners) share
//! the line but are ignored.

use std::fmt;
use std::time::Instant;

use crate::Error;

/// One decoded reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceEvent {
    pub present: bool,
    pub timestamp: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The line was not valid UTF-8, usually a baud mismatch or line noise
    InvalidUtf8,
    /// The line carries the tag but no flag field
    Malformed,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUtf8 => write!(f, "line is not valid UTF-8"),
            Self::Malformed => write!(f, "sentence has no presence field"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoder {
    tag: String,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(crate::SENTENCE_TAG)
    }
}

impl Decoder {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
        }
    }

    /// Decode one complete line (without its terminator)
    ///
    /// Returns `Ok(None)` for lines that are not presence sentences.
    pub fn decode(&self, line: &[u8], now: Instant) -> Result<Option<PresenceEvent>, DecodeError> {
        let line = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8)?;
        let line = line.trim();
        if !line.starts_with(self.tag.as_str()) {
            return Ok(None);
        }
        let flag = line.split(',').nth(1).ok_or(DecodeError::Malformed)?;
        Ok(Some(PresenceEvent {
            present: flag.trim() == "1",
            timestamp: now,
        }))
    }
}

/// Longest line kept, anything longer is noise
pub const MAX_LINE: usize = 256;

/// Splits a byte stream into lines across partial reads
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
    overflowed: bool,
}

impl LineAssembler {
    /// Append `bytes` and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.partial);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if !std::mem::take(&mut self.overflowed) && !line.is_empty() {
                    lines.push(line);
                }
            } else if self.partial.len() < MAX_LINE {
                self.partial.push(byte);
            } else {
                self.overflowed = true;
            }
        }
        lines
    }

    /// Forget the partial line, used when the input buffer is discarded
    pub fn clear(&mut self) {
        self.partial.clear();
        self.overflowed = false;
    }
}

/// Size of one range step of the sensor
pub const RANGE_INCREMENT_M: f64 = 0.15;
/// Largest range setting the sensor accepts
pub const MAX_RANGE_INCREMENTS: i64 = 127;

/// Convert metres to the sensor's native 15cm increments
pub fn meters_to_increments(meters: f64) -> i64 {
    (meters / RANGE_INCREMENT_M).round() as i64
}

pub fn increments_to_meters(increments: i64) -> f64 {
    increments as f64 * RANGE_INCREMENT_M
}

/// Commands that store a new detection range in the sensor
pub fn range_commands(min_meters: f64, max_meters: f64) -> Result<Vec<String>, Error> {
    let min = meters_to_increments(min_meters);
    let max = meters_to_increments(max_meters);
    if min < 0 || max > MAX_RANGE_INCREMENTS || min > max {
        return Err(Error::Config(format!(
            "detection range {min_meters}m..{max_meters}m outside 0..{:.2}m",
            increments_to_meters(MAX_RANGE_INCREMENTS)
        )));
    }
    Ok(vec![
        "sensorStop".to_string(),
        format!("detRangeCfg -1 {min} {max}"),
        "saveCfg 0x45670123 0xCDEF89AB 0x956128C6 0xDF54AC89".to_string(),
        "sensorStart".to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Option<bool>, DecodeError> {
        Decoder::default()
            .decode(line.as_bytes(), Instant::now())
            .map(|event| event.map(|e| e.present))
    }

    #[test]
    fn test_presence_flag() {
        assert_eq!(decode("$JYBSS,1, , , *"), Ok(Some(true)));
        assert_eq!(decode("$JYBSS,0,,,*"), Ok(Some(false)));
        assert_eq!(decode("  $JYBSS,1,,,*  "), Ok(Some(true)));
    }

    #[test]
    fn test_only_literal_one_is_presence() {
        assert_eq!(decode("$JYBSS,2,,,*"), Ok(Some(false)));
        assert_eq!(decode("$JYBSS,,,,*"), Ok(Some(false)));
        assert_eq!(decode("$JYBSS,10,,,*"), Ok(Some(false)));
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        assert_eq!(decode("Done"), Ok(None));
        assert_eq!(decode("leapMMW:/>sensorStart"), Ok(None));
        assert_eq!(decode(""), Ok(None));
    }

    #[test]
    fn test_malformed_sentence() {
        assert_eq!(decode("$JYBSS"), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_invalid_utf8() {
        let result = Decoder::default().decode(&[b'$', 0xff, 0xfe, b'1'], Instant::now());
        assert_eq!(result, Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_assembler_partial_reads() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.push(b"$JYBSS,1").is_empty());
        let lines = assembler.push(b",,,*\r\n$JYBSS,0,,,*\n$JY");
        assert_eq!(lines, vec![b"$JYBSS,1,,,*".to_vec(), b"$JYBSS,0,,,*".to_vec()]);
        assert_eq!(assembler.push(b"BSS,1\n"), vec![b"$JYBSS,1".to_vec()]);
    }

    #[test]
    fn test_assembler_drops_overlong_line() {
        let mut assembler = LineAssembler::default();
        let noise = vec![b'x'; MAX_LINE + 10];
        assert!(assembler.push(&noise).is_empty());
        assert!(assembler.push(b"\n").is_empty());
        assert_eq!(assembler.push(b"ok\n"), vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_assembler_clear() {
        let mut assembler = LineAssembler::default();
        assembler.push(b"$JYBSS,1,");
        assembler.clear();
        assert_eq!(assembler.push(b"$JYBSS,0\n"), vec![b"$JYBSS,0".to_vec()]);
    }

    #[test]
    fn test_range_commands() {
        let commands = range_commands(0.5, 3.0).unwrap();
        assert_eq!(commands[0], "sensorStop");
        assert_eq!(commands[1], "detRangeCfg -1 3 20");
        assert_eq!(commands[3], "sensorStart");
        assert!(range_commands(0.0, 20.0).is_err());
        assert!(range_commands(3.0, 1.0).is_err());
    }
}
