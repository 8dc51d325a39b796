//! The decode worker: waits for commands and runs one song at a time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use decoder_types::{AudioFormat, DecoderCommand, DecoderState, MixRampInfo};

use crate::bridge::DecoderBridge;
use crate::client::DecoderClient;
use crate::control::DecoderControl;
use crate::error::DecoderError;
use crate::plugins::PluginRegistry;

/// Owns the decoder thread. Dropping it asks the thread to quit and joins it.
pub struct DecoderThread {
    control: Arc<DecoderControl>,
    handle: Option<JoinHandle<()>>,
}

impl DecoderThread {
    pub fn spawn(control: Arc<DecoderControl>, registry: Arc<PluginRegistry>) -> Self {
        let worker_control = control.clone();
        let handle = thread::spawn(move || decoder_task(&worker_control, &registry));

        Self {
            control,
            handle: Some(handle),
        }
    }

    pub fn control(&self) -> &Arc<DecoderControl> {
        &self.control
    }

    /// Stop the thread and wait for it to exit.
    pub fn quit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.control.quit();
        if handle.join().is_err() {
            tracing::error!("decoder thread panicked");
        }
    }
}

impl Drop for DecoderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn decoder_task(control: &Arc<DecoderControl>, registry: &PluginRegistry) {
    tracing::debug!("decoder thread started");
    let mut st = control.lock();
    loop {
        let command = st.command;
        match command {
            DecoderCommand::Start => {
                drop(st);
                run_song(control, registry);
                st = control.lock();
            }
            DecoderCommand::Seek => {
                // Nothing is playing.
                st.seek_error = true;
                control.command_finished_locked(&mut st);
            }
            DecoderCommand::Stop => control.command_finished_locked(&mut st),
            DecoderCommand::None => {
                if st.quit {
                    break;
                }
                st = control.wait(st);
            }
        }
    }
    tracing::debug!("decoder thread exiting");
}

/// Decode the requested song into its pipe and publish the outcome.
fn run_song(control: &Arc<DecoderControl>, registry: &PluginRegistry) {
    let request = {
        let mut st = control.lock();
        let request = st.song.clone().zip(st.pipe.clone());
        st.state = DecoderState::Start;
        st.error = None;
        st.seek_error = false;
        st.seekable = false;
        st.total_time = None;
        st.in_audio_format = AudioFormat::default();
        st.out_audio_format = AudioFormat::default();
        st.mix_ramp = MixRampInfo::default();
        st.replay_gain_db = 0.0;
        control.command_finished_locked(&mut st);
        request
    };

    let Some((song, pipe)) = request else {
        let mut st = control.lock();
        st.state = DecoderState::Error;
        st.error = Some(DecoderError::FailedToDecode("no song".to_string()));
        control.notify_client();
        return;
    };

    tracing::info!(uri = %song.uri, "decoding");
    let mut bridge = DecoderBridge::new(control.clone(), pipe, &song);
    let result = decode_song(&mut bridge, control, registry, &song.uri);

    if control.poll() == DecoderCommand::None && !bridge.has_error() {
        bridge.finish();
    }

    let failure = match result {
        Err(err) => Some(err),
        Ok(()) => bridge.take_error(),
    };
    drop(bridge);

    let mut st = control.lock();
    let failure = failure
        .or_else(|| {
            (st.state == DecoderState::Start && st.command != DecoderCommand::Stop)
                .then(|| DecoderError::FailedToDecode(song.uri.clone()))
        })
        .filter(|err| !matches!(err, DecoderError::Stopped));

    match failure {
        Some(err) => {
            tracing::error!(uri = %song.uri, "decoder failed: {err}");
            st.state = DecoderState::Error;
            st.error = Some(err);
        }
        None => {
            tracing::info!(uri = %song.uri, "decoder finished");
            st.state = DecoderState::Stop;
        }
    }
    control.notify_client();
}

/// Try the candidate plugins until one of them accepts the song.
fn decode_song(
    bridge: &mut DecoderBridge,
    control: &DecoderControl,
    registry: &PluginRegistry,
    uri: &str,
) -> Result<(), DecoderError> {
    let input = bridge.open_uri(uri)?;
    let mime_type = input.mime_type().map(str::to_string);
    let candidates = registry.candidates(uri, mime_type.as_deref());
    if candidates.is_empty() {
        return Err(DecoderError::NoPlugin(uri.to_string()));
    }

    let mut input = Some(input);
    for plugin in candidates {
        if control.poll() == DecoderCommand::Stop {
            return Ok(());
        }

        // The previous candidate consumed the stream.
        let input = match input.take() {
            Some(input) => input,
            None => bridge.open_uri(uri)?,
        };

        bridge.reset();
        tracing::debug!(plugin = plugin.name(), %uri, "trying decoder plugin");
        let result = plugin.stream_decode(bridge, input);
        let accepted = control.state() != DecoderState::Start;

        match result {
            Err(err) if accepted => return Err(err.into()),
            Err(err) => {
                tracing::warn!(plugin = plugin.name(), %uri, "decoder plugin failed: {err:#}");
            }
            Ok(()) if accepted => return Ok(()),
            Ok(()) => {}
        }
    }

    Ok(())
}
