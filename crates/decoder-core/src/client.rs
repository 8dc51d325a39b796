//! The callback surface decoder plugins talk to.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use decoder_types::{AudioFormat, DecoderCommand, MixRampInfo, ReplayGainInfo, Tag};

use crate::input::{InputStream, InputStreamPtr};

/// Tells a reader owned by a third-party decoder library that the song is
/// being stopped; such readers do not go through [`DecoderClient::read`].
pub trait ReadCancel: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Everything a decoder plugin may ask of the pipeline while it runs.
///
/// Calls are made from the decode worker only. None of them fail: problems
/// are recorded by the implementation and show up as a STOP command.
pub trait DecoderClient {
    /// Announce the decoded format. Must be called exactly once, before any
    /// audio is submitted.
    fn ready(&mut self, audio_format: AudioFormat, seekable: bool, duration: Option<Duration>);

    /// Command the plugin should act on now.
    fn get_command(&mut self) -> DecoderCommand;

    /// The plugin has executed the current command.
    fn command_finished(&mut self);

    /// Target of the current SEEK.
    fn get_seek_time(&mut self) -> Duration;

    /// Target of the current SEEK in frames of the decoded format.
    fn get_seek_frame(&mut self) -> u64;

    /// The current SEEK could not be executed.
    fn seek_error(&mut self);

    /// Open another resource (e.g. a sidecar file).
    ///
    /// Fails with [`DecoderError::Stopped`](crate::DecoderError::Stopped)
    /// when the decoder is being stopped.
    fn open_uri(&mut self, uri: &str) -> Result<InputStreamPtr>;

    /// Read from `input`, returning 0 on end of stream, on error and when a
    /// pending command should interrupt the plugin.
    fn read(&mut self, input: &mut dyn InputStream, buf: &mut [u8]) -> usize;

    /// Handle for readers that bypass [`DecoderClient::read`].
    fn read_cancel(&self) -> Arc<dyn ReadCancel>;

    /// Position of the next submitted audio, in seconds.
    fn submit_timestamp(&mut self, t: f64);

    /// Hand over decoded audio in the format passed to [`DecoderClient::ready`].
    ///
    /// Returns the command the plugin should act on next.
    fn submit_audio(
        &mut self,
        input: Option<&mut dyn InputStream>,
        data: &[u8],
        kbit_rate: u16,
    ) -> DecoderCommand;

    /// New metadata from the file.
    fn submit_tag(&mut self, input: Option<&mut dyn InputStream>, tag: Tag) -> DecoderCommand;

    /// New replay gain values; `None` when the file has none.
    fn submit_replay_gain(&mut self, info: Option<&ReplayGainInfo>);

    fn submit_mix_ramp(&mut self, info: MixRampInfo);
}
