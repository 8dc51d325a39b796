//! Decode pipeline configuration.
//!
//! Loaded from the `[decoder]`-style TOML table of the daemon config; every
//! field has a default so an empty table is valid.

use std::path::Path;

use anyhow::{Context, Result};
use decoder_types::{AudioFormat, ReplayGainConfig, ReplayGainMode};
use serde::Deserialize;

/// Tuning parameters shared by the bridge, the chunk pool and the converter.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Output format mask such as `44100:16:2` or `*:f:*`.
    ///
    /// `None` keeps whatever the decoder plugin produces.
    pub output_format: Option<String>,
    /// Number of chunks in the pool; bounds how far the decoder may run ahead.
    pub buffer_chunks: usize,
    /// Capacity of one chunk in bytes.
    pub chunk_size: usize,
    pub replay_gain_mode: ReplayGainMode,
    pub replay_gain: ReplayGainConfig,
    /// Resampler input block size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            output_format: None,
            buffer_chunks: 1024,
            chunk_size: 4096,
            replay_gain_mode: ReplayGainMode::Off,
            replay_gain: ReplayGainConfig::default(),
            resample_chunk_frames: 1024,
        }
    }
}

impl DecoderConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<DecoderConfig>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parsed output format mask; all wildcards when unset.
    pub fn output_format_mask(&self) -> Result<AudioFormat> {
        match self.output_format.as_deref() {
            None => Ok(AudioFormat::default()),
            Some(s) => {
                AudioFormat::parse_mask(s).with_context(|| format!("output_format {s:?}"))
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.buffer_chunks > 0, "buffer_chunks must be positive");
        anyhow::ensure!(
            self.chunk_size >= 64,
            "chunk_size must hold at least one frame of any format"
        );
        anyhow::ensure!(
            self.resample_chunk_frames > 0,
            "resample_chunk_frames must be positive"
        );
        self.output_format_mask()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decoder_types::SampleFormat;

    #[test]
    fn empty_table_uses_defaults() {
        let cfg = DecoderConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.buffer_chunks, 1024);
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.output_format_mask().unwrap(), AudioFormat::default());
    }

    #[test]
    fn parses_output_format_and_replay_gain() {
        let cfg = DecoderConfig::from_toml_str(
            r#"
            output_format = "48000:f:2"
            buffer_chunks = 16
            replay_gain_mode = "album"

            [replay_gain]
            preamp_db = 3.0
            limit = false
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.output_format_mask().unwrap(),
            AudioFormat::new(48_000, SampleFormat::Float, 2)
        );
        assert_eq!(cfg.buffer_chunks, 16);
        assert_eq!(cfg.replay_gain_mode, ReplayGainMode::Album);
        assert_eq!(cfg.replay_gain.preamp_db, 3.0);
        assert!(!cfg.replay_gain.limit);
        assert_eq!(cfg.replay_gain.missing_preamp_db, 0.0);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(DecoderConfig::from_toml_str("output_format = \"44100:12:2\"").is_err());
        assert!(DecoderConfig::from_toml_str("buffer_chunks = 0").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decoder.toml");
        std::fs::write(&path, "chunk_size = 8192\n").unwrap();
        let cfg = DecoderConfig::load(&path).unwrap();
        assert_eq!(cfg.chunk_size, 8192);
    }
}
