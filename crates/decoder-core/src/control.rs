//! Command channel between the player (controller) and the decode worker.
//!
//! All shared decoder state lives behind one mutex. Two condition variables
//! carry the wake-ups: `cond` for the decode worker (new command, chunk
//! recycled) and `client_cond` for the controller (command finished, state
//! changed).
//!
//! Only one command may be pending at a time. Posting while another command
//! is outstanding fails instead of overwriting it; the high-level helpers
//! ([`DecoderControl::start`], [`DecoderControl::stop`],
//! [`DecoderControl::seek`]) wait for the previous command first.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use decoder_types::{
    AudioFormat, DecoderCommand, DecoderState, MixRampInfo, ReplayGainConfig, ReplayGainMode, Tag,
};

use crate::buffer::MusicBuffer;
use crate::chunk::MusicChunk;
use crate::client::ReadCancel;
use crate::config::DecoderConfig;
use crate::error::DecoderError;
use crate::pipe::MusicPipe;

/// Everything the decoder needs to play one song.
#[derive(Clone, Debug, Default)]
pub struct SongRequest {
    pub uri: String,
    /// Position inside the file where the song starts (sub-songs, cue tracks).
    pub start_time: Duration,
    /// Position where decoding must stop, if the song ends before the file does.
    pub end_time: Option<Duration>,
    /// Tag from the song database; used when the input provides none.
    pub tag: Option<Tag>,
    /// Fail the song when seeking to `start_time` fails.
    pub initial_seek_essential: bool,
}

/// State shared between the decode worker and the controller.
pub(crate) struct ControlState {
    pub(crate) command: DecoderCommand,
    pub(crate) state: DecoderState,
    pub(crate) quit: bool,
    pub(crate) seek_time: Duration,
    pub(crate) seek_error: bool,
    pub(crate) seekable: bool,
    pub(crate) total_time: Option<Duration>,
    pub(crate) in_audio_format: AudioFormat,
    pub(crate) out_audio_format: AudioFormat,
    pub(crate) song: Option<SongRequest>,
    pub(crate) pipe: Option<Arc<MusicPipe>>,
    pub(crate) error: Option<DecoderError>,
    pub(crate) mix_ramp: MixRampInfo,
    pub(crate) replay_gain_db: f32,
}

/// The command channel plus the decoder status the controller may observe.
pub struct DecoderControl {
    inner: Mutex<ControlState>,
    cond: Condvar,
    client_cond: Condvar,
    buffer: Arc<MusicBuffer>,
    configured_audio_format: AudioFormat,
    replay_gain_mode: ReplayGainMode,
    replay_gain_config: ReplayGainConfig,
    resample_chunk_frames: usize,
    replay_gain_serial: AtomicU32,
}

impl DecoderControl {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Mutex::new(ControlState {
                command: DecoderCommand::None,
                state: DecoderState::Stop,
                quit: false,
                seek_time: Duration::ZERO,
                seek_error: false,
                seekable: false,
                total_time: None,
                in_audio_format: AudioFormat::default(),
                out_audio_format: AudioFormat::default(),
                song: None,
                pipe: None,
                error: None,
                mix_ramp: MixRampInfo::default(),
                replay_gain_db: 0.0,
            }),
            cond: Condvar::new(),
            client_cond: Condvar::new(),
            buffer: Arc::new(MusicBuffer::new(config.buffer_chunks, config.chunk_size)),
            configured_audio_format: config.output_format_mask()?,
            replay_gain_mode: config.replay_gain_mode,
            replay_gain_config: config.replay_gain,
            resample_chunk_frames: config.resample_chunk_frames,
            replay_gain_serial: AtomicU32::new(0),
        })
    }

    /// Pool all chunks of this decoder come from.
    pub fn buffer(&self) -> &Arc<MusicBuffer> {
        &self.buffer
    }

    /// A new pipe sized for this decoder's pool.
    pub fn new_pipe(&self) -> Arc<MusicPipe> {
        Arc::new(MusicPipe::new(self.buffer.num_chunks()))
    }

    // ---- raw channel operations ----

    /// Post `command` without waiting for it.
    ///
    /// `seek_time` is recorded for [`DecoderCommand::Seek`].
    pub fn post(
        &self,
        command: DecoderCommand,
        seek_time: Option<Duration>,
    ) -> Result<(), DecoderError> {
        let mut st = self.lock();
        if st.command != DecoderCommand::None {
            return Err(DecoderError::CommandPending);
        }
        Self::set_command(&mut st, command, seek_time);
        drop(st);
        self.cond.notify_all();
        Ok(())
    }

    /// The pending command, `None` when there is nothing to do.
    pub fn poll(&self) -> DecoderCommand {
        self.lock().command
    }

    /// Block until the pending command has been acknowledged.
    pub fn wait_command_finished(&self) {
        let st = self.lock();
        drop(self.wait_command_finished_locked(st));
    }

    /// Acknowledge the pending command and wake the controller.
    pub fn acknowledge(&self) {
        let mut st = self.lock();
        self.command_finished_locked(&mut st);
    }

    // ---- controller operations ----

    /// Start decoding `song` into `pipe`; returns once the decoder has
    /// accepted the request.
    ///
    /// A song that is still being decoded is stopped first.
    pub fn start(&self, song: SongRequest, pipe: Arc<MusicPipe>) {
        let mut st = self.lock();
        st = self.wait_command_finished_locked(st);
        if !Self::is_idle_state(st.state) {
            st = self.synchronous_command_locked(st, DecoderCommand::Stop, None);
        }

        tracing::debug!(uri = %song.uri, start_time = ?song.start_time, "decoder start requested");
        st.song = Some(song);
        st.pipe = Some(pipe);
        st.error = None;
        if st.state == DecoderState::Error {
            st.state = DecoderState::Stop;
        }
        drop(self.synchronous_command_locked(st, DecoderCommand::Start, None));
    }

    /// Stop decoding and wait until the decoder is idle.
    pub fn stop(&self) {
        let mut st = self.lock();
        st = self.wait_command_finished_locked(st);
        if !Self::is_idle_state(st.state) {
            st = self.synchronous_command_locked(st, DecoderCommand::Stop, None);
        }
        drop(st);
    }

    /// Seek the current song to `time` and wait for the result.
    pub fn seek(&self, time: Duration) -> Result<(), DecoderError> {
        let mut st = self.lock();
        st = self.wait_command_finished_locked(st);
        if st.state != DecoderState::Decode || !st.seekable {
            return Err(DecoderError::NotSeekable);
        }

        st = self.synchronous_command_locked(st, DecoderCommand::Seek, Some(time));
        if st.seek_error {
            return Err(DecoderError::SeekFailed);
        }
        Ok(())
    }

    /// Ask the decoder thread to exit; does not wait.
    pub fn quit(&self) {
        let mut st = self.lock();
        st = self.wait_command_finished_locked(st);
        st.quit = true;
        Self::set_command(&mut st, DecoderCommand::Stop, None);
        drop(st);
        self.cond.notify_all();
    }

    /// Hand a consumed chunk back and wake a decoder waiting for space.
    pub fn recycle(&self, chunk: MusicChunk) {
        drop(chunk);
        self.signal();
    }

    /// Wake the decode worker.
    pub fn signal(&self) {
        let _st = self.lock();
        self.cond.notify_all();
    }

    /// Block while the decoder is starting (before the plugin reported its
    /// audio format).
    pub fn wait_for_decoder(&self) {
        let st = self.lock();
        drop(
            self.client_cond
                .wait_while(st, |st| st.state == DecoderState::Start)
                .unwrap(),
        );
    }

    /// Block until the decoder is idle, or `timeout` elapsed. Returns `true`
    /// when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let st = self.lock();
        let (st, _timeout) = self
            .client_cond
            .wait_timeout_while(st, timeout, |st| {
                !Self::is_idle_state(st.state) || st.command != DecoderCommand::None
            })
            .unwrap();
        Self::is_idle_state(st.state)
    }

    // ---- status ----

    pub fn state(&self) -> DecoderState {
        self.lock().state
    }

    pub fn is_idle(&self) -> bool {
        Self::is_idle_state(self.state())
    }

    pub fn is_starting(&self) -> bool {
        self.state() == DecoderState::Start
    }

    pub fn has_failed(&self) -> bool {
        self.state() == DecoderState::Error
    }

    pub fn in_audio_format(&self) -> AudioFormat {
        self.lock().in_audio_format
    }

    pub fn out_audio_format(&self) -> AudioFormat {
        self.lock().out_audio_format
    }

    pub fn is_seekable(&self) -> bool {
        self.lock().seekable
    }

    pub fn total_time(&self) -> Option<Duration> {
        self.lock().total_time
    }

    pub fn mix_ramp(&self) -> MixRampInfo {
        self.lock().mix_ramp.clone()
    }

    /// Gain the player should apply, derived from the latest replay gain info.
    pub fn replay_gain_db(&self) -> f32 {
        self.lock().replay_gain_db
    }

    /// Re-raise the error of the last song, if it failed.
    pub fn check_rethrow_error(&self) -> Result<(), DecoderError> {
        let st = self.lock();
        if st.state != DecoderState::Error {
            return Ok(());
        }
        Err(st
            .error
            .clone()
            .unwrap_or_else(|| DecoderError::FailedToDecode(String::new())))
    }

    /// Forget the error of the last song.
    pub fn clear_error(&self) {
        let mut st = self.lock();
        if st.state == DecoderState::Error {
            st.state = DecoderState::Stop;
            st.error = None;
        }
    }

    // ---- decoder side ----

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap()
    }

    /// Wait for a new command or a recycled chunk.
    pub(crate) fn wait<'a>(&self, st: MutexGuard<'a, ControlState>) -> MutexGuard<'a, ControlState> {
        self.cond.wait(st).unwrap()
    }

    /// Like [`DecoderControl::wait`], but returns after `timeout`.
    ///
    /// Dropping a chunk returns it to the pool without touching this lock,
    /// so a producer waiting for free space polls the pool as well.
    pub(crate) fn wait_timeout<'a>(
        &self,
        st: MutexGuard<'a, ControlState>,
        timeout: Duration,
    ) -> MutexGuard<'a, ControlState> {
        self.cond.wait_timeout(st, timeout).unwrap().0
    }

    pub(crate) fn notify_client(&self) {
        self.client_cond.notify_all();
    }

    pub(crate) fn command_finished_locked(&self, st: &mut ControlState) {
        st.command = DecoderCommand::None;
        self.client_cond.notify_all();
    }

    pub(crate) fn configured_audio_format(&self) -> AudioFormat {
        self.configured_audio_format
    }

    pub(crate) fn resample_chunk_frames(&self) -> usize {
        self.resample_chunk_frames
    }

    pub(crate) fn replay_gain_mode(&self) -> ReplayGainMode {
        self.replay_gain_mode
    }

    pub(crate) fn replay_gain_config(&self) -> &ReplayGainConfig {
        &self.replay_gain_config
    }

    /// Next replay gain serial; never 0, unique for the lifetime of this
    /// control so the player can detect changes across songs.
    pub(crate) fn next_replay_gain_serial(&self) -> u32 {
        loop {
            let serial = self
                .replay_gain_serial
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if serial != 0 {
                return serial;
            }
        }
    }

    fn set_command(st: &mut ControlState, command: DecoderCommand, seek_time: Option<Duration>) {
        st.command = command;
        if let Some(time) = seek_time {
            st.seek_time = time;
            st.seek_error = false;
        }
    }

    fn wait_command_finished_locked<'a>(
        &self,
        st: MutexGuard<'a, ControlState>,
    ) -> MutexGuard<'a, ControlState> {
        self.client_cond
            .wait_while(st, |st| st.command != DecoderCommand::None)
            .unwrap()
    }

    fn synchronous_command_locked<'a>(
        &self,
        mut st: MutexGuard<'a, ControlState>,
        command: DecoderCommand,
        seek_time: Option<Duration>,
    ) -> MutexGuard<'a, ControlState> {
        debug_assert_eq!(st.command, DecoderCommand::None);
        Self::set_command(&mut st, command, seek_time);
        self.cond.notify_all();
        self.wait_command_finished_locked(st)
    }

    fn is_idle_state(state: DecoderState) -> bool {
        matches!(state, DecoderState::Stop | DecoderState::Error)
    }
}

impl ReadCancel for DecoderControl {
    fn is_cancelled(&self) -> bool {
        self.lock().command == DecoderCommand::Stop
    }
}
