//! Failures surfaced to the controller.

use std::sync::Arc;

use thiserror::Error;

/// Error kinds the decoder reports across the worker/controller boundary.
///
/// The type is `Clone` so the error slot can be re-raised any number of times
/// until the next decode attempt resets it.
#[derive(Clone, Debug, Error)]
pub enum DecoderError {
    /// A command is still pending; wait for it before posting another one.
    #[error("a decoder command is already pending")]
    CommandPending,

    #[error("not seekable")]
    NotSeekable,

    #[error("decoder failed to seek")]
    SeekFailed,

    /// The operation was cancelled by a STOP command.
    #[error("decoder stopped")]
    Stopped,

    #[error("unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("no decoder plugin for {0}")]
    NoPlugin(String),

    /// No plugin managed to report an audio format for the song.
    #[error("failed to decode {0}")]
    FailedToDecode(String),

    /// I/O or codec failure from a plugin or input stream.
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for DecoderError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DecoderError>() {
            Ok(err) => err,
            Err(err) => DecoderError::Failed(Arc::new(err)),
        }
    }
}
