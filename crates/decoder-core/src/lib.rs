//! Decoder bridge: runs decoder plugins on a worker thread and hands their
//! output to the player as fixed-size music chunks.

pub mod bridge;
pub mod buffer;
pub mod chunk;
pub mod client;
pub mod config;
pub mod control;
pub mod convert;
pub mod error;
pub mod initial_seek;
pub mod input;
pub mod pipe;
pub mod plugins;
pub mod thread;

pub use bridge::DecoderBridge;
pub use buffer::MusicBuffer;
pub use chunk::MusicChunk;
pub use client::{DecoderClient, ReadCancel};
pub use config::DecoderConfig;
pub use control::{DecoderControl, SongRequest};
pub use convert::PcmConvert;
pub use error::DecoderError;
pub use initial_seek::{InitialSeek, InitialSeekState};
pub use input::{InputStream, InputStreamPtr};
pub use pipe::MusicPipe;
pub use plugins::{DecoderPlugin, PluginRegistry};
pub use thread::DecoderThread;

pub use decoder_types::{
    AudioFormat, DecoderCommand, DecoderState, MixRampInfo, ReplayGainInfo, ReplayGainMode, Tag,
    TagType,
};
