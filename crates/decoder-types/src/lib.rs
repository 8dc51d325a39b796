//! Plain data shared between the decode worker and its controller.
//!
//! Nothing in here locks or blocks; these are the values that travel inside
//! music chunks and status snapshots.

mod audio_format;
mod command;
mod mix_ramp;
mod replay_gain;
mod tag;

pub use audio_format::{AudioFormat, ParseAudioFormatError, SampleFormat};
pub use command::{DecoderCommand, DecoderState};
pub use mix_ramp::MixRampInfo;
pub use replay_gain::{ReplayGainConfig, ReplayGainInfo, ReplayGainMode, ReplayGainTuple};
pub use tag::{Tag, TagItem, TagType};
