use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Highest sample rate the pipeline accepts (Hz).
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Highest channel count the pipeline accepts.
pub const MAX_CHANNELS: u8 = 8;

/// PCM sample encoding. All variants are native-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Not known yet, or a wildcard inside a format mask.
    #[default]
    Undefined,
    S8,
    S16,
    /// Signed 24 bit integer stored in the low bits of a 32 bit word.
    S24P32,
    S32,
    /// 32 bit float in the range `-1.0..=1.0`.
    Float,
}

impl SampleFormat {
    /// Size of one sample in bytes; 0 for [`SampleFormat::Undefined`].
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::Undefined => 0,
            SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24P32 | SampleFormat::S32 | SampleFormat::Float => 4,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Undefined => "*",
            SampleFormat::S8 => "8",
            SampleFormat::S16 => "16",
            SampleFormat::S24P32 => "24",
            SampleFormat::S32 => "32",
            SampleFormat::Float => "f",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an audio format string cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseAudioFormatError(String);

impl fmt::Display for ParseAudioFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid audio format: {}", self.0)
    }
}

impl std::error::Error for ParseAudioFormatError {}

/// Sample rate, sample encoding and channel count of a PCM stream.
///
/// A zero `sample_rate`/`channels` or an undefined `format` means "unknown";
/// in a mask (see [`AudioFormat::with_mask`]) it means "keep the source value".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u8,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, format: SampleFormat, channels: u8) -> Self {
        Self {
            sample_rate,
            format,
            channels,
        }
    }

    /// `true` once the sample rate is known.
    pub fn is_defined(&self) -> bool {
        self.sample_rate != 0
    }

    /// `true` when every attribute is known.
    pub fn is_fully_defined(&self) -> bool {
        self.sample_rate != 0 && self.format != SampleFormat::Undefined && self.channels != 0
    }

    /// `true` when the format is fully defined and within the supported limits.
    pub fn is_valid(&self) -> bool {
        self.is_fully_defined()
            && self.sample_rate <= MAX_SAMPLE_RATE
            && self.channels <= MAX_CHANNELS
    }

    /// Bytes per sample.
    pub fn sample_size(&self) -> usize {
        self.format.sample_size()
    }

    /// Bytes per frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channels as usize
    }

    /// Play time of `bytes` bytes of audio in this format, in seconds.
    pub fn size_to_seconds(&self, bytes: usize) -> f64 {
        let frame_size = self.frame_size();
        if frame_size == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        (bytes / frame_size) as f64 / self.sample_rate as f64
    }

    /// Number of frames covering `time` at this sample rate (rounded).
    pub fn time_to_frames(&self, time: Duration) -> u64 {
        (time.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    /// Replace every attribute that is defined in `mask`.
    pub fn with_mask(self, mask: AudioFormat) -> Self {
        let mut out = self;
        if mask.sample_rate != 0 {
            out.sample_rate = mask.sample_rate;
        }
        if mask.format != SampleFormat::Undefined {
            out.format = mask.format;
        }
        if mask.channels != 0 {
            out.channels = mask.channels;
        }
        out
    }

    /// Parse a `rate:bits:channels` string where any field may be `*`.
    pub fn parse_mask(s: &str) -> Result<Self, ParseAudioFormatError> {
        parse(s, true)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sample_rate == 0 {
            f.write_str("*")?;
        } else {
            write!(f, "{}", self.sample_rate)?;
        }
        write!(f, ":{}:", self.format)?;
        if self.channels == 0 {
            f.write_str("*")
        } else {
            write!(f, "{}", self.channels)
        }
    }
}

impl FromStr for AudioFormat {
    type Err = ParseAudioFormatError;

    /// Parse a fully specified `rate:bits:channels` string such as `44100:16:2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s, false)
    }
}

fn parse(s: &str, allow_wildcards: bool) -> Result<AudioFormat, ParseAudioFormatError> {
    let err = || ParseAudioFormatError(s.to_string());
    let mut parts = s.trim().split(':');
    let (Some(rate), Some(bits), Some(channels), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(err());
    };

    let wildcard = |field: &str| allow_wildcards && field == "*";

    let sample_rate = if wildcard(rate) {
        0
    } else {
        let rate: u32 = rate.parse().map_err(|_| err())?;
        if rate == 0 || rate > MAX_SAMPLE_RATE {
            return Err(err());
        }
        rate
    };

    let format = match bits {
        b if wildcard(b) => SampleFormat::Undefined,
        "8" => SampleFormat::S8,
        "16" => SampleFormat::S16,
        "24" => SampleFormat::S24P32,
        "32" => SampleFormat::S32,
        "f" => SampleFormat::Float,
        _ => return Err(err()),
    };

    let channels = if wildcard(channels) {
        0
    } else {
        let channels: u8 = channels.parse().map_err(|_| err())?;
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(err());
        }
        channels
    };

    Ok(AudioFormat {
        sample_rate,
        format,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_format() {
        let af: AudioFormat = "44100:16:2".parse().unwrap();
        assert_eq!(af, AudioFormat::new(44_100, SampleFormat::S16, 2));
        assert_eq!(af.frame_size(), 4);
        assert!(af.is_valid());
    }

    #[test]
    fn strict_parse_rejects_wildcards() {
        assert!("*:16:2".parse::<AudioFormat>().is_err());
        assert!("44100:12:2".parse::<AudioFormat>().is_err());
        assert!("44100:16".parse::<AudioFormat>().is_err());
        assert!("44100:16:0".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn mask_keeps_source_attributes_for_wildcards() {
        let mask = AudioFormat::parse_mask("*:f:*").unwrap();
        let src = AudioFormat::new(48_000, SampleFormat::S24P32, 6);
        assert_eq!(
            src.with_mask(mask),
            AudioFormat::new(48_000, SampleFormat::Float, 6)
        );
        assert_eq!(mask.to_string(), "*:f:*");
    }

    #[test]
    fn size_and_time_helpers() {
        let af = AudioFormat::new(44_100, SampleFormat::S16, 2);
        assert!((af.size_to_seconds(44_100 * 4) - 1.0).abs() < 1e-9);
        assert_eq!(af.time_to_frames(Duration::from_millis(500)), 22_050);
        assert_eq!(AudioFormat::default().size_to_seconds(128), 0.0);
    }
}
