use serde::{Deserialize, Serialize};

/// Command posted by the controller for the decode worker.
///
/// At most one command is pending at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderCommand {
    #[default]
    None,
    /// Begin decoding the requested song.
    Start,
    /// Stop decoding as soon as possible.
    Stop,
    /// Reposition to the requested seek time and continue.
    Seek,
}

/// Life cycle of the decode worker as seen by the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    /// Idle, no song is being decoded.
    #[default]
    Stop,
    /// A song was started but the plugin has not reported its format yet.
    Start,
    /// The plugin is producing audio.
    Decode,
    /// The last song failed; the error is kept until the next start.
    Error,
}
