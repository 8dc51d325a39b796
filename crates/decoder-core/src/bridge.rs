//! Glue between a running decoder plugin and the rest of the pipeline.
//!
//! One [`DecoderBridge`] exists per decode attempt. It turns the plugin's
//! callbacks into [`MusicChunk`]s on the [`MusicPipe`], translates controller
//! commands into what the plugin should see (including the synthesized SEEK
//! to a song's start offset) and keeps the first failure for the decoder
//! thread to report.
//!
//! Timing: `timestamp` is the file position of the next frame in seconds and
//! `absolute_frame` the same position in output frames. Chunk times are
//! relative to the song start. Seek targets are file positions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use decoder_types::{
    AudioFormat, DecoderCommand, DecoderState, MixRampInfo, ReplayGainInfo, ReplayGainMode, Tag,
};

use crate::chunk::MusicChunk;
use crate::client::{DecoderClient, ReadCancel};
use crate::control::{DecoderControl, SongRequest};
use crate::convert::PcmConvert;
use crate::error::DecoderError;
use crate::initial_seek::{InitialSeek, SeekFailure};
use crate::input::{self, InputStream, InputStreamPtr};
use crate::pipe::MusicPipe;

/// Upper bound on how long a producer sleeps before looking at the pool
/// again when nobody called [`DecoderControl::recycle`].
const POOL_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct DecoderBridge {
    control: Arc<DecoderControl>,
    pipe: Arc<MusicPipe>,

    start_time: Duration,
    end_time: Option<Duration>,

    in_format: AudioFormat,
    out_format: AudioFormat,
    /// `None` when the plugin already produces the output format.
    convert: Option<PcmConvert>,

    timestamp: f64,
    absolute_frame: u64,

    initial_seek: InitialSeek,
    /// Set by [`DecoderClient::get_seek_time`] for a real SEEK, cleared when
    /// it completes.
    seeking: bool,

    /// Tag from the song database; sent with the first audio unless the
    /// stream provides its own.
    song_tag: Option<Tag>,
    stream_tag: Option<Tag>,
    decoder_tag: Option<Tag>,

    current_chunk: Option<MusicChunk>,
    replay_gain_info: ReplayGainInfo,
    replay_gain_serial: u32,
    /// Mix ramp waiting for the next chunk.
    mix_ramp: Option<MixRampInfo>,

    error: Option<DecoderError>,
}

impl DecoderBridge {
    pub fn new(control: Arc<DecoderControl>, pipe: Arc<MusicPipe>, song: &SongRequest) -> Self {
        Self {
            control,
            pipe,
            start_time: song.start_time,
            end_time: song.end_time,
            in_format: AudioFormat::default(),
            out_format: AudioFormat::default(),
            convert: None,
            timestamp: 0.0,
            absolute_frame: 0,
            initial_seek: InitialSeek::new(
                song.start_time > Duration::ZERO,
                song.initial_seek_essential,
            ),
            seeking: false,
            song_tag: song.tag.clone(),
            stream_tag: None,
            decoder_tag: None,
            current_chunk: None,
            replay_gain_info: ReplayGainInfo::default(),
            replay_gain_serial: 0,
            mix_ramp: None,
            error: None,
        }
    }

    /// Position of the next frame in seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Position of the next frame in output frames.
    pub fn absolute_frame(&self) -> u64 {
        self.absolute_frame
    }

    pub fn initial_seek(&self) -> &InitialSeek {
        &self.initial_seek
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Re-raise the captured failure; the slot is left intact.
    pub fn check_rethrow_error(&self) -> Result<(), DecoderError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<DecoderError> {
        self.error.take()
    }

    /// Forget the captured failure before trying another plugin.
    pub fn reset(&mut self) {
        self.error = None;
    }

    /// Open a local file for the plugin.
    pub fn open_local(&mut self, path: &Path) -> Result<InputStreamPtr> {
        if self.control.lock().command == DecoderCommand::Stop {
            return Err(DecoderError::Stopped.into());
        }
        input::open_local(path)
    }

    /// Should a blocking read give up? True after a failure and for any
    /// command except a SEEK the plugin is expected to handle itself.
    pub fn check_cancel_read(&self) -> bool {
        if self.error.is_some() {
            return true;
        }

        let st = self.control.lock();
        match st.command {
            DecoderCommand::None => false,
            // A SEEK during start-up is handled once the plugin is ready.
            DecoderCommand::Seek => {
                !(st.state == DecoderState::Start || self.seeking || self.initial_seek.is_running())
            }
            _ => true,
        }
    }

    /// Push the in-progress chunk, if any.
    pub fn check_flush_chunk(&mut self) {
        if let Some(chunk) = self.current_chunk.take() {
            self.push_chunk(chunk);
        }
    }

    /// End of the song: emit what the converter still holds and push the
    /// in-progress chunk.
    pub fn finish(&mut self) {
        if let Some(convert) = self.convert.as_mut() {
            match convert.flush() {
                Ok(tail) if !tail.is_empty() => {
                    self.pack(&tail, 0);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("converter flush failed: {err:#}");
                    self.error = Some(err.into());
                }
            }
        }
        self.check_flush_chunk();
    }

    /// Command the plugin should see, including the synthesized SEEK to the
    /// song start.
    fn virtual_command(&mut self) -> DecoderCommand {
        if self.error.is_some() {
            return DecoderCommand::Stop;
        }
        if self.prepare_initial_seek() {
            return DecoderCommand::Seek;
        }
        self.control.lock().command
    }

    /// Whether the plugin should currently be executing the initial seek.
    fn prepare_initial_seek(&mut self) -> bool {
        let st = self.control.lock();
        // Wait until the plugin has parsed the headers.
        st.state == DecoderState::Decode
            && self
                .initial_seek
                .poll(st.seekable, st.command != DecoderCommand::None)
    }

    fn set_position(&mut self, time: Duration) {
        self.timestamp = time.as_secs_f64();
        self.absolute_frame = self.out_format.time_to_frames(time);
    }

    /// Time of the next frame relative to the song start.
    fn song_time(&self) -> f64 {
        (self.timestamp - self.start_time.as_secs_f64()).max(0.0)
    }

    /// The in-progress chunk, or a freshly allocated one.
    ///
    /// Blocks while the pool is exhausted; gives up with the pending command
    /// when the controller posts one.
    fn take_chunk(&mut self) -> Result<MusicChunk, DecoderCommand> {
        if let Some(chunk) = self.current_chunk.take() {
            return Ok(chunk);
        }

        let buffer = Arc::clone(self.control.buffer());
        let mut chunk = loop {
            if let Some(chunk) = buffer.allocate() {
                break chunk;
            }

            let st = self.control.lock();
            // A chunk may have been recycled before we got the lock.
            if let Some(chunk) = buffer.allocate() {
                break chunk;
            }
            if st.command != DecoderCommand::None {
                return Err(st.command);
            }
            tracing::trace!(in_use = buffer.in_use(), "chunk pool exhausted; waiting");
            let st = self.control.wait_timeout(st, POOL_POLL_INTERVAL);
            if st.command != DecoderCommand::None {
                return Err(st.command);
            }
        };

        chunk.replay_gain_serial = self.replay_gain_serial;
        if self.replay_gain_serial != 0 {
            chunk.replay_gain_info = self.replay_gain_info;
        }
        chunk.mix_ramp = self.mix_ramp.take();
        Ok(chunk)
    }

    fn push_chunk(&mut self, chunk: MusicChunk) {
        debug_assert!(!self.seeking);
        debug_assert!(!self.initial_seek.is_running());

        if !chunk.is_empty() {
            self.pipe.push(chunk);
        }

        let _st = self.control.lock();
        self.control.notify_client();
    }

    /// Start a new chunk carrying `tag`.
    fn send_tag(&mut self, tag: Tag) -> DecoderCommand {
        // The tag takes effect at a chunk boundary.
        self.check_flush_chunk();

        match self.take_chunk() {
            Ok(mut chunk) => {
                chunk.tag = Some(tag);
                chunk.time = self.song_time();
                self.current_chunk = Some(chunk);
                DecoderCommand::None
            }
            Err(command) => command,
        }
    }

    /// Refresh `stream_tag` from the input, falling back to the song tag.
    /// Returns `true` when there is a new one to send.
    fn update_stream_tag(&mut self, input: Option<&mut dyn InputStream>) -> bool {
        let tag = match input.and_then(|input| input.read_tag()) {
            Some(tag) => {
                self.song_tag = None;
                tag
            }
            None => match self.song_tag.take() {
                Some(tag) => tag,
                None => return false,
            },
        };
        self.stream_tag = Some(tag);
        true
    }

    /// Copy output-format audio into chunks and advance the position.
    fn pack(&mut self, audio: &[u8], kbit_rate: u16) -> DecoderCommand {
        let format = self.out_format;
        let frame_size = format.frame_size();
        let mut audio = &audio[..audio.len() - audio.len() % frame_size];

        let end_frame = self.end_time.map(|end| format.time_to_frames(end));
        if let Some(end_frame) = end_frame {
            if self.absolute_frame >= end_frame {
                return DecoderCommand::Stop;
            }
            let remaining = (end_frame - self.absolute_frame).saturating_mul(frame_size as u64);
            if (audio.len() as u64) > remaining {
                audio = &audio[..remaining as usize];
            }
        }

        while !audio.is_empty() {
            let mut chunk = match self.take_chunk() {
                Ok(chunk) => chunk,
                Err(command) => return command,
            };

            let time = self.song_time();
            let dest = chunk.write(format, time, kbit_rate);
            if dest.is_empty() {
                if chunk.len() == 0 {
                    let capacity = chunk.capacity();
                    self.error =
                        Some(anyhow!("chunk of {capacity} bytes cannot hold a {format} frame").into());
                    return DecoderCommand::Stop;
                }
                self.push_chunk(chunk);
                continue;
            }

            let n = dest.len().min(audio.len());
            dest[..n].copy_from_slice(&audio[..n]);
            if chunk.expand(format, n) {
                self.push_chunk(chunk);
            } else {
                self.current_chunk = Some(chunk);
            }

            audio = &audio[n..];
            let frames = (n / frame_size) as u64;
            self.timestamp += frames as f64 / format.sample_rate as f64;
            self.absolute_frame += frames;
        }

        match end_frame {
            Some(end_frame) if self.absolute_frame >= end_frame => DecoderCommand::Stop,
            _ => DecoderCommand::None,
        }
    }
}

impl DecoderClient for DecoderBridge {
    fn ready(&mut self, audio_format: AudioFormat, seekable: bool, duration: Option<Duration>) {
        assert!(!self.in_format.is_defined(), "ready() called twice");
        debug_assert!(self.convert.is_none());
        debug_assert!(!self.seeking);

        let out_format = audio_format.with_mask(self.control.configured_audio_format());
        tracing::debug!(
            %audio_format,
            seekable,
            duration_ms = duration.map(|d| d.as_millis() as u64),
            "decoder ready"
        );

        {
            let mut st = self.control.lock();
            st.in_audio_format = audio_format;
            st.out_audio_format = out_format;
            st.seekable = seekable;
            st.total_time = duration;
            st.state = DecoderState::Decode;
            self.control.notify_client();
        }

        self.in_format = audio_format;
        self.out_format = out_format;

        if !audio_format.is_valid() {
            self.error = Some(anyhow!("invalid audio format {audio_format}").into());
            return;
        }

        if audio_format != out_format {
            tracing::debug!(%out_format, "converting");
            match PcmConvert::with_resample_chunk(
                audio_format,
                out_format,
                self.control.resample_chunk_frames(),
            ) {
                Ok(convert) => self.convert = Some(convert),
                Err(err) => {
                    tracing::warn!("cannot convert {audio_format} to {out_format}: {err:#}");
                    self.error = Some(err.into());
                }
            }
        }
    }

    fn get_command(&mut self) -> DecoderCommand {
        self.virtual_command()
    }

    fn command_finished(&mut self) {
        let control = Arc::clone(&self.control);
        let mut st = control.lock();

        if self.initial_seek.is_running() {
            debug_assert!(!self.seeking);
            debug_assert!(self.current_chunk.is_none());
            self.initial_seek.finish();
            self.set_position(self.start_time);
            tracing::debug!(start_time = ?self.start_time, "initial seek done");
            return;
        }

        debug_assert_ne!(st.command, DecoderCommand::None);

        if self.seeking {
            self.seeking = false;

            // Drop audio from the old position.
            self.current_chunk = None;
            let discarded = self.pipe.clear();
            if let Some(convert) = self.convert.as_mut() {
                convert.reset();
            }
            self.set_position(st.seek_time);
            tracing::debug!(seek_time = ?st.seek_time, discarded, "seek done");
        }

        control.command_finished_locked(&mut st);
    }

    fn get_seek_time(&mut self) -> Duration {
        if self.initial_seek.is_running() {
            return self.start_time;
        }

        let st = self.control.lock();
        debug_assert_eq!(st.command, DecoderCommand::Seek);
        self.seeking = true;
        st.seek_time
    }

    fn get_seek_frame(&mut self) -> u64 {
        let time = self.get_seek_time();
        self.in_format.time_to_frames(time)
    }

    fn seek_error(&mut self) {
        if self.initial_seek.is_running() {
            match self.initial_seek.fail() {
                SeekFailure::Fatal => {
                    tracing::warn!(start_time = ?self.start_time, "initial seek failed");
                    self.error = Some(DecoderError::SeekFailed);
                }
                SeekFailure::Ignored => {
                    tracing::warn!(
                        start_time = ?self.start_time,
                        "initial seek failed; playing from the beginning"
                    );
                    // Chunk times now count from the start of the file.
                    self.start_time = Duration::ZERO;
                }
            }
            return;
        }

        let mut st = self.control.lock();
        debug_assert_eq!(st.command, DecoderCommand::Seek);
        tracing::warn!(seek_time = ?st.seek_time, "seek failed");
        st.seek_error = true;
        self.seeking = false;
        self.control.command_finished_locked(&mut st);
    }

    fn open_uri(&mut self, uri: &str) -> Result<InputStreamPtr> {
        if self.control.lock().command == DecoderCommand::Stop {
            return Err(DecoderError::Stopped.into());
        }
        let input = input::open_uri(uri)?;
        if self.control.lock().command == DecoderCommand::Stop {
            return Err(DecoderError::Stopped.into());
        }
        Ok(input)
    }

    fn read(&mut self, input: &mut dyn InputStream, buf: &mut [u8]) -> usize {
        if buf.is_empty() || self.check_cancel_read() {
            return 0;
        }

        match input.read(buf) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(uri = input.uri(), "read failed: {err:#}");
                self.error = Some(err.into());
                0
            }
        }
    }

    fn read_cancel(&self) -> Arc<dyn ReadCancel> {
        self.control.clone()
    }

    fn submit_timestamp(&mut self, t: f64) {
        debug_assert!(t >= 0.0);
        self.timestamp = t;
        self.absolute_frame = (t * self.out_format.sample_rate as f64).round() as u64;
    }

    fn submit_audio(
        &mut self,
        input: Option<&mut dyn InputStream>,
        data: &[u8],
        kbit_rate: u16,
    ) -> DecoderCommand {
        let command = self.virtual_command();
        if matches!(command, DecoderCommand::Stop | DecoderCommand::Seek) || data.is_empty() {
            return command;
        }
        debug_assert_eq!(data.len() % self.in_format.frame_size(), 0);

        if self.update_stream_tag(input) {
            let tag = match (&self.decoder_tag, &self.stream_tag) {
                (Some(decoder), Some(stream)) => Tag::merge(decoder, stream),
                (None, Some(stream)) => stream.clone(),
                (_, None) => Tag::new(),
            };
            let command = self.send_tag(tag);
            if command != DecoderCommand::None {
                return command;
            }
        }

        let converted;
        let audio = match self.convert.as_mut() {
            Some(convert) => match convert.convert(data) {
                Ok(out) => {
                    converted = out;
                    &converted[..]
                }
                Err(err) => {
                    tracing::warn!("conversion failed: {err:#}");
                    self.error = Some(err.into());
                    return DecoderCommand::Stop;
                }
            },
            None => data,
        };

        self.pack(audio, kbit_rate)
    }

    fn submit_tag(&mut self, input: Option<&mut dyn InputStream>, tag: Tag) -> DecoderCommand {
        self.update_stream_tag(input);

        // No chunk may be started before the initial seek is done.
        if self.prepare_initial_seek() {
            self.decoder_tag = Some(tag);
            return DecoderCommand::Seek;
        }

        let merged = match &self.stream_tag {
            Some(stream) => Tag::merge(stream, &tag),
            None => tag.clone(),
        };
        self.decoder_tag = Some(tag);
        self.send_tag(merged)
    }

    fn submit_replay_gain(&mut self, info: Option<&ReplayGainInfo>) {
        let Some(info) = info else {
            self.replay_gain_serial = 0;
            return;
        };

        let serial = self.control.next_replay_gain_serial();

        let mode = self.control.replay_gain_mode();
        if mode != ReplayGainMode::Off {
            let mode = if mode == ReplayGainMode::Album {
                ReplayGainMode::Album
            } else {
                ReplayGainMode::Track
            };
            let scale = info
                .get(mode)
                .calculate_scale(self.control.replay_gain_config());
            self.control.lock().replay_gain_db = 20.0 * scale.log10();
        }

        self.replay_gain_info = *info;
        self.replay_gain_serial = serial;

        // The new values apply to the samples that follow.
        self.check_flush_chunk();
    }

    fn submit_mix_ramp(&mut self, info: MixRampInfo) {
        self.control.lock().mix_ramp = info.clone();
        match self.current_chunk.as_mut() {
            Some(chunk) => chunk.mix_ramp = Some(info),
            None => self.mix_ramp = Some(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;
    use crate::input::MemoryInputStream;
    use decoder_types::{ReplayGainTuple, SampleFormat, TagType};
    use std::thread;

    /// 44.1 kHz, 16 bit, stereo: 4 bytes per frame, 16 frames per 64 byte chunk.
    const CD: AudioFormat = AudioFormat::new(44_100, SampleFormat::S16, 2);

    struct Harness {
        control: Arc<DecoderControl>,
        pipe: Arc<MusicPipe>,
    }

    impl Harness {
        fn new(buffer_chunks: usize) -> Self {
            Self::with_config(DecoderConfig {
                buffer_chunks,
                chunk_size: 64,
                ..DecoderConfig::default()
            })
        }

        fn with_config(config: DecoderConfig) -> Self {
            let control = Arc::new(DecoderControl::new(&config).unwrap());
            let pipe = control.new_pipe();
            control.lock().state = DecoderState::Start;
            Self { control, pipe }
        }

        fn bridge(&self, song: &SongRequest) -> DecoderBridge {
            DecoderBridge::new(self.control.clone(), self.pipe.clone(), song)
        }

        fn ready_bridge(&self, song: &SongRequest, seekable: bool) -> DecoderBridge {
            let mut bridge = self.bridge(song);
            bridge.ready(CD, seekable, Some(Duration::from_secs(60)));
            bridge
        }

        fn drain(&self) -> Vec<MusicChunk> {
            std::iter::from_fn(|| self.pipe.shift()).collect()
        }
    }

    fn song() -> SongRequest {
        SongRequest {
            uri: "test.raw".to_string(),
            ..SongRequest::default()
        }
    }

    fn song_at(start_secs: u64, essential: bool) -> SongRequest {
        SongRequest {
            start_time: Duration::from_secs(start_secs),
            initial_seek_essential: essential,
            ..song()
        }
    }

    fn frames_invariant(bridge: &DecoderBridge, rate: u32) -> bool {
        bridge.absolute_frame() == (bridge.timestamp() * rate as f64).round() as u64
    }

    #[test]
    fn ready_publishes_format_and_state() {
        let h = Harness::new(4);
        let _bridge = h.ready_bridge(&song(), true);
        assert_eq!(h.control.state(), DecoderState::Decode);
        assert_eq!(h.control.in_audio_format(), CD);
        assert_eq!(h.control.out_audio_format(), CD);
        assert!(h.control.is_seekable());
        assert_eq!(h.control.total_time(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn one_chunk_of_audio_pushes_one_chunk() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song(), true);

        assert_eq!(bridge.submit_audio(None, &[1u8; 32], 128), DecoderCommand::None);
        assert!(h.pipe.is_empty());
        assert_eq!(bridge.submit_audio(None, &[2u8; 32], 128), DecoderCommand::None);

        let chunks = h.drain();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].time, 0.0);
        assert_eq!(chunks[0].len(), 64);
        assert_eq!(chunks[0].bit_rate, 128);
        assert_eq!(chunks[0].audio_format(), CD);
        assert!(bridge.current_chunk.is_none());
    }

    #[test]
    fn every_tag_starts_a_new_chunk() {
        let h = Harness::new(8);
        let mut bridge = h.ready_bridge(&song(), true);
        let tag = Tag::new().with_item(TagType::Title, "Intro");

        bridge.submit_audio(None, &[0u8; 8], 0);
        assert_eq!(bridge.submit_tag(None, tag.clone()), DecoderCommand::None);
        assert_eq!(h.pipe.len(), 1);
        assert_eq!(bridge.submit_tag(None, tag.clone()), DecoderCommand::None);
        assert_eq!(h.pipe.len(), 2);
        bridge.submit_audio(None, &[0u8; 8], 0);
        bridge.check_flush_chunk();

        let chunks = h.drain();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].tag.is_none());
        assert_eq!(chunks[0].len(), 8);
        assert_eq!(chunks[1].tag.as_ref(), Some(&tag));
        assert!(chunks[1].audio().is_empty());
        assert_eq!(chunks[2].tag.as_ref(), Some(&tag));
        assert_eq!(chunks[2].len(), 8);
        assert!((chunks[2].time - 2.0 / 44_100.0).abs() < 1e-12);
    }

    #[test]
    fn essential_initial_seek_failure_is_fatal() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song_at(5, true), true);

        assert_eq!(bridge.get_command(), DecoderCommand::Seek);
        assert_eq!(bridge.get_seek_time(), Duration::from_secs(5));
        bridge.seek_error();

        assert_eq!(bridge.get_command(), DecoderCommand::Stop);
        assert_eq!(bridge.submit_audio(None, &[0u8; 64], 0), DecoderCommand::Stop);
        bridge.check_flush_chunk();
        assert!(h.pipe.is_empty());
        assert!(matches!(
            bridge.check_rethrow_error(),
            Err(DecoderError::SeekFailed)
        ));
    }

    #[test]
    fn non_essential_initial_seek_failure_plays_from_start() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song_at(5, false), true);

        assert_eq!(bridge.get_command(), DecoderCommand::Seek);
        bridge.seek_error();

        assert_eq!(bridge.get_command(), DecoderCommand::None);
        for _ in 0..3 {
            assert_eq!(bridge.submit_audio(None, &[0u8; 64], 0), DecoderCommand::None);
        }

        // Timed from the start of the file, as if no seek had been asked for.
        let times: Vec<f64> = h.drain().iter().map(|c| c.time).collect();
        assert_eq!(times.len(), 3);
        for (i, time) in times.iter().enumerate() {
            assert!((time - (16 * i) as f64 / 44_100.0).abs() < 1e-12);
        }
        assert!(bridge.check_rethrow_error().is_ok());
    }

    #[test]
    fn initial_seek_positions_at_song_start() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song_at(5, true), true);

        // Tags during the pending seek must not start a chunk.
        let tag = Tag::new().with_item(TagType::Artist, "A");
        assert_eq!(bridge.submit_tag(None, tag), DecoderCommand::Seek);
        assert!(bridge.current_chunk.is_none());

        assert_eq!(bridge.get_command(), DecoderCommand::Seek);
        assert_eq!(bridge.get_seek_frame(), 5 * 44_100);
        bridge.command_finished();

        assert_eq!(bridge.timestamp(), 5.0);
        assert_eq!(bridge.absolute_frame(), 5 * 44_100);
        assert_eq!(bridge.get_command(), DecoderCommand::None);
        assert_eq!(h.control.poll(), DecoderCommand::None);

        bridge.submit_audio(None, &[0u8; 64], 0);
        assert_eq!(h.drain()[0].time, 0.0);
    }

    #[test]
    fn unseekable_stream_skips_initial_seek() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song_at(5, true), false);
        assert_eq!(bridge.get_command(), DecoderCommand::None);
        assert!(bridge.check_rethrow_error().is_ok());
    }

    #[test]
    fn stop_unblocks_worker_waiting_for_a_chunk() {
        let h = Harness::new(2);

        let worker = {
            let control = h.control.clone();
            let pipe = h.pipe.clone();
            thread::spawn(move || {
                let mut bridge = DecoderBridge::new(control, pipe, &song());
                bridge.ready(CD, true, None);
                let command = bridge.submit_audio(None, &[0u8; 64 * 5], 0);
                (command, bridge.absolute_frame())
            })
        };

        while h.pipe.len() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        h.control.post(DecoderCommand::Stop, None).unwrap();

        let (command, frames) = worker.join().unwrap();
        assert_eq!(command, DecoderCommand::Stop);
        assert_eq!(frames, 32);

        h.control.acknowledge();
        assert_eq!(h.pipe.len(), 2);
    }

    #[test]
    fn recycled_chunk_unblocks_worker() {
        let h = Harness::new(1);

        let worker = {
            let control = h.control.clone();
            let pipe = h.pipe.clone();
            thread::spawn(move || {
                let mut bridge = DecoderBridge::new(control, pipe, &song());
                bridge.ready(CD, true, None);
                bridge.submit_audio(None, &[0u8; 64 * 2], 0)
            })
        };

        let mut received = 0;
        while received < 2 {
            if let Some(chunk) = h.pipe.wait_for_chunk(Duration::from_millis(10)) {
                received += 1;
                h.control.recycle(chunk);
            }
        }
        assert_eq!(worker.join().unwrap(), DecoderCommand::None);
    }

    #[test]
    fn dropped_chunk_unblocks_worker() {
        let h = Harness::new(1);

        let worker = {
            let control = h.control.clone();
            let pipe = h.pipe.clone();
            thread::spawn(move || {
                let mut bridge = DecoderBridge::new(control, pipe, &song());
                bridge.ready(CD, true, None);
                bridge.submit_audio(None, &[0u8; 64 * 2], 0)
            })
        };

        // The consumer never calls recycle(); dropping is enough.
        let mut received = 0;
        while received < 2 {
            if let Some(chunk) = h.pipe.wait_for_chunk(Duration::from_millis(10)) {
                received += 1;
                drop(chunk);
            }
        }
        assert_eq!(worker.join().unwrap(), DecoderCommand::None);
    }

    #[test]
    #[should_panic(expected = "ready() called twice")]
    fn second_ready_panics() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song(), true);
        bridge.ready(CD, true, None);
    }

    #[test]
    fn replay_gain_serial_tracks_updates() {
        let h = Harness::new(8);
        let mut bridge = h.ready_bridge(&song(), true);
        let first = ReplayGainInfo {
            track: ReplayGainTuple::new(-6.0, 0.5),
            ..ReplayGainInfo::default()
        };
        let second = ReplayGainInfo {
            track: ReplayGainTuple::new(-3.0, 0.9),
            ..ReplayGainInfo::default()
        };

        bridge.submit_audio(None, &[0u8; 64], 0);
        bridge.submit_replay_gain(Some(&first));
        bridge.submit_audio(None, &[0u8; 8], 0);
        // Flushes the partial chunk.
        bridge.submit_replay_gain(Some(&second));
        bridge.submit_audio(None, &[0u8; 64], 0);
        bridge.submit_audio(None, &[0u8; 64], 0);
        bridge.submit_replay_gain(None);
        bridge.submit_audio(None, &[0u8; 64], 0);
        bridge.check_flush_chunk();

        let chunks = h.drain();
        let serials: Vec<u32> = chunks.iter().map(|c| c.replay_gain_serial).collect();
        assert_eq!(serials.len(), 5);
        assert_eq!(serials[0], 0);
        assert!(serials[1] > 0);
        assert!(serials[2] > serials[1]);
        assert_eq!(serials[3], serials[2]);
        assert_eq!(serials[4], 0);
        assert_eq!(chunks[1].replay_gain_info, first);
        assert_eq!(chunks[2].replay_gain_info, second);
    }

    #[test]
    fn replay_gain_db_follows_mode() {
        let h = Harness::with_config(DecoderConfig {
            replay_gain_mode: ReplayGainMode::Album,
            ..DecoderConfig::default()
        });
        let mut bridge = h.ready_bridge(&song(), true);
        let info = ReplayGainInfo {
            track: ReplayGainTuple::new(-3.0, 0.0),
            album: ReplayGainTuple::new(-6.0, 0.0),
        };
        bridge.submit_replay_gain(Some(&info));
        assert!((h.control.replay_gain_db() + 6.0).abs() < 1e-3);
    }

    #[test]
    fn frame_counter_matches_timestamp() {
        let h = Harness::new(16);
        let mut bridge = h.ready_bridge(&song(), true);

        for size in [4usize, 60, 28, 100, 4] {
            bridge.submit_audio(None, &vec![0u8; size], 0);
            assert!(frames_invariant(&bridge, CD.sample_rate));
        }
        bridge.submit_timestamp(1.25);
        assert_eq!(bridge.absolute_frame(), 55_125);
        bridge.submit_audio(None, &[0u8; 36], 0);
        assert!(frames_invariant(&bridge, CD.sample_rate));
    }

    #[test]
    fn three_chunks_without_commands() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song(), true);

        for piece in 0..6 {
            assert_eq!(bridge.get_command(), DecoderCommand::None);
            let data = vec![piece as u8; 32];
            assert_eq!(bridge.submit_audio(None, &data, 0), DecoderCommand::None);
        }
        bridge.finish();
        assert_eq!(bridge.get_command(), DecoderCommand::None);

        let chunks = h.drain();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.len(), 64);
            assert!((chunk.time - (16 * i) as f64 / 44_100.0).abs() < 1e-12);
            assert_eq!(chunk.audio()[0], (2 * i) as u8);
            assert_eq!(chunk.audio()[63], (2 * i + 1) as u8);
        }
        drop(chunks);
        assert_eq!(h.control.buffer().in_use(), 0);
    }

    #[test]
    fn chunks_follow_submitted_timestamps() {
        let h = Harness::new(4);
        let mut bridge = h.bridge(&song());
        bridge.ready(CD, true, Some(Duration::from_secs(10)));
        assert_eq!(bridge.get_command(), DecoderCommand::None);

        for (i, t) in [0.0, 1.0, 2.0].into_iter().enumerate() {
            bridge.submit_timestamp(t);
            assert_eq!(bridge.get_command(), DecoderCommand::None);
            let data = vec![i as u8; 64];
            assert_eq!(bridge.submit_audio(None, &data, 0), DecoderCommand::None);
            assert_eq!(bridge.get_command(), DecoderCommand::None);
        }

        let chunks = h.drain();
        let times: Vec<f64> = chunks.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.len(), 64);
            assert!(chunk.audio().iter().all(|&b| b == i as u8));
        }
        assert!(bridge.current_chunk.is_none());
    }

    #[test]
    fn real_seek_discards_old_audio() {
        let h = Harness::new(8);
        let mut bridge = h.ready_bridge(&song(), true);
        bridge.submit_audio(None, &[0u8; 64 + 8], 0);
        assert_eq!(h.pipe.len(), 1);

        h.control
            .post(DecoderCommand::Seek, Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(bridge.submit_audio(None, &[0u8; 8], 0), DecoderCommand::Seek);
        assert!(bridge.check_cancel_read());
        assert_eq!(bridge.get_seek_frame(), 88_200);
        // The plugin is seeking now; reads must go through.
        assert!(!bridge.check_cancel_read());
        bridge.command_finished();

        assert!(h.pipe.is_empty());
        assert!(bridge.current_chunk.is_none());
        assert_eq!(bridge.timestamp(), 2.0);
        assert_eq!(h.control.poll(), DecoderCommand::None);
        assert_eq!(h.control.buffer().in_use(), 0);
    }

    #[test]
    fn real_seek_error_is_reported() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song(), true);
        h.control
            .post(DecoderCommand::Seek, Some(Duration::from_secs(100)))
            .unwrap();
        bridge.get_seek_time();
        bridge.seek_error();

        assert_eq!(h.control.poll(), DecoderCommand::None);
        assert!(h.control.lock().seek_error);
        assert!(bridge.check_rethrow_error().is_ok());
    }

    #[test]
    fn end_time_truncates_and_stops() {
        let h = Harness::new(4);
        let song = SongRequest {
            end_time: Some(Duration::from_millis(10)),
            ..song()
        };
        let mut bridge = h.bridge(&song);
        bridge.ready(AudioFormat::new(1_000, SampleFormat::S16, 1), true, None);

        assert_eq!(bridge.submit_audio(None, &[0u8; 40], 0), DecoderCommand::Stop);
        assert_eq!(bridge.absolute_frame(), 10);
        bridge.check_flush_chunk();
        assert_eq!(h.drain()[0].len(), 20);
    }

    #[test]
    fn read_is_cancelled_by_stop_but_not_by_early_seek() {
        let h = Harness::new(4);
        let mut bridge = h.bridge(&song());
        let mut input = MemoryInputStream::new("mem://x", vec![7u8; 16]);
        let mut buf = [0u8; 4];

        // A SEEK posted while starting up is handled after ready().
        h.control
            .post(DecoderCommand::Seek, Some(Duration::ZERO))
            .unwrap();
        assert_eq!(bridge.read(&mut input, &mut buf), 4);
        h.control.acknowledge();

        h.control.post(DecoderCommand::Stop, None).unwrap();
        assert!(bridge.check_cancel_read());
        assert_eq!(bridge.read(&mut input, &mut buf), 0);
        assert!(matches!(
            DecoderError::from(bridge.open_uri("/nonexistent").err().unwrap()),
            DecoderError::Stopped
        ));
    }

    #[test]
    fn song_tag_is_replaced_by_stream_tag() {
        let h = Harness::new(8);
        let song = SongRequest {
            tag: Some(Tag::new().with_item(TagType::Title, "From Database")),
            ..song()
        };

        let mut bridge = h.ready_bridge(&song, true);
        bridge.submit_audio(None, &[0u8; 8], 0);
        bridge.check_flush_chunk();
        let chunks = h.drain();
        assert_eq!(
            chunks[0].tag.as_ref().and_then(|t| t.get_value(TagType::Title)),
            Some("From Database")
        );

        h.control.lock().state = DecoderState::Start;
        let mut bridge = h.ready_bridge(&song, true);
        let mut input = MemoryInputStream::new("mem://radio", vec![])
            .non_seekable()
            .with_tag(Tag::new().with_item(TagType::Name, "Radio"));
        bridge.submit_tag(None, Tag::new().with_item(TagType::Title, "Now Playing"));
        bridge.submit_audio(Some(&mut input), &[0u8; 8], 0);
        bridge.check_flush_chunk();

        let chunks = h.drain();
        let tag = chunks.last().and_then(|c| c.tag.as_ref()).unwrap();
        assert_eq!(tag.get_value(TagType::Name), Some("Radio"));
        assert_eq!(tag.get_value(TagType::Title), Some("Now Playing"));
    }

    #[test]
    fn mix_ramp_is_attached_to_next_chunk() {
        let h = Harness::new(4);
        let mut bridge = h.ready_bridge(&song(), true);
        let info = MixRampInfo {
            start: Some("-20 0.5;".to_string()),
            end: None,
        };
        bridge.submit_mix_ramp(info.clone());
        bridge.submit_audio(None, &[0u8; 64], 0);

        assert_eq!(h.control.mix_ramp(), info);
        assert_eq!(h.drain()[0].mix_ramp.as_ref(), Some(&info));
    }

    #[test]
    fn output_format_mask_converts() {
        let h = Harness::with_config(DecoderConfig {
            output_format: Some("*:f:*".to_string()),
            chunk_size: 64,
            buffer_chunks: 4,
            ..DecoderConfig::default()
        });
        let mut bridge = h.ready_bridge(&song(), true);
        assert_eq!(
            h.control.out_audio_format(),
            AudioFormat::new(44_100, SampleFormat::Float, 2)
        );

        bridge.submit_audio(None, &[0u8; 16], 0);
        bridge.check_flush_chunk();
        let chunk = h.pipe.shift().unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(chunk.audio_format().format, SampleFormat::Float);
    }
}
