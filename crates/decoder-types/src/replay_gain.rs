use serde::{Deserialize, Serialize};

/// Gain values at or below this are treated as "not present".
const UNDEFINED_GAIN: f32 = -200.0;

/// Upper bound for the linear scale factor.
const MAX_SCALE: f32 = 15.0;

/// Which replay gain tuple the daemon applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
    /// Album gain when playing whole albums, track gain otherwise.
    Auto,
}

/// Replay gain tuning, in decibels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainConfig {
    /// Applied on top of the stored gain.
    pub preamp_db: f32,
    /// Applied to files without replay gain information.
    pub missing_preamp_db: f32,
    /// Clamp the scale so that `scale * peak <= 1.0`.
    pub limit: bool,
}

impl Default for ReplayGainConfig {
    fn default() -> Self {
        Self {
            preamp_db: 0.0,
            missing_preamp_db: 0.0,
            limit: true,
        }
    }
}

fn db_to_scale(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// One gain/peak pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    pub gain: f32,
    pub peak: f32,
}

impl Default for ReplayGainTuple {
    fn default() -> Self {
        Self {
            gain: UNDEFINED_GAIN,
            peak: 0.0,
        }
    }
}

impl ReplayGainTuple {
    pub fn new(gain: f32, peak: f32) -> Self {
        Self { gain, peak }
    }

    pub fn is_defined(&self) -> bool {
        self.gain > -100.0
    }

    /// Linear scale factor for this tuple under `config`.
    pub fn calculate_scale(&self, config: &ReplayGainConfig) -> f32 {
        if !self.is_defined() {
            return db_to_scale(config.missing_preamp_db);
        }

        let mut scale = (db_to_scale(self.gain) * db_to_scale(config.preamp_db)).min(MAX_SCALE);
        if config.limit && self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

/// Track and album replay gain of one song.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    pub track: ReplayGainTuple,
    pub album: ReplayGainTuple,
}

impl ReplayGainInfo {
    pub fn is_defined(&self) -> bool {
        self.track.is_defined() || self.album.is_defined()
    }

    /// Tuple to apply for `mode`, falling back to the other one when missing.
    pub fn get(&self, mode: ReplayGainMode) -> &ReplayGainTuple {
        if mode == ReplayGainMode::Album {
            if self.album.is_defined() {
                &self.album
            } else {
                &self.track
            }
        } else if self.track.is_defined() {
            &self.track
        } else {
            &self.album
        }
    }
}
