//! The unit of audio handed from the decoder to the player.

use crossbeam_channel::Sender;
use decoder_types::{AudioFormat, MixRampInfo, ReplayGainInfo, Tag};

/// A fixed-capacity block of converted audio plus the metadata that starts
/// with it.
///
/// Chunks are move-only. Whoever holds one owns it exclusively; dropping it
/// hands the storage back to the [`MusicBuffer`](crate::buffer::MusicBuffer)
/// it came from.
#[derive(Debug)]
pub struct MusicChunk {
    data: Box<[u8]>,
    length: usize,
    audio_format: AudioFormat,
    /// Play time of the first frame in seconds, relative to the song start.
    pub time: f64,
    /// Bit rate of the source in kbit/s, 0 when unknown.
    pub bit_rate: u16,
    /// Tag that becomes effective at the start of this chunk.
    pub tag: Option<Tag>,
    /// Serial of [`MusicChunk::replay_gain_info`]; 0 means "no info".
    pub replay_gain_serial: u32,
    pub replay_gain_info: ReplayGainInfo,
    pub mix_ramp: Option<MixRampInfo>,
    recycle: Option<Sender<Box<[u8]>>>,
}

impl MusicChunk {
    pub(crate) fn new(data: Box<[u8]>, recycle: Option<Sender<Box<[u8]>>>) -> Self {
        Self {
            data,
            length: 0,
            audio_format: AudioFormat::default(),
            time: 0.0,
            bit_rate: 0,
            tag: None,
            replay_gain_serial: 0,
            replay_gain_info: ReplayGainInfo::default(),
            mix_ramp: None,
            recycle,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of audio bytes written so far.
    pub fn len(&self) -> usize {
        self.length
    }

    /// `true` when the chunk carries neither audio nor a tag.
    pub fn is_empty(&self) -> bool {
        self.length == 0 && self.tag.is_none()
    }

    pub fn audio(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Format of [`MusicChunk::audio`]; undefined while no audio was written.
    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    /// Play time of the audio in this chunk, in seconds.
    pub fn duration(&self) -> f64 {
        self.audio_format.size_to_seconds(self.length)
    }

    /// Writable tail of the chunk, trimmed to whole frames.
    ///
    /// The first write into an empty chunk fixes its format, time and bit
    /// rate. An empty slice means no further frame fits.
    pub(crate) fn write(&mut self, format: AudioFormat, time: f64, bit_rate: u16) -> &mut [u8] {
        debug_assert!(self.length == 0 || self.audio_format == format);

        if self.length == 0 {
            self.audio_format = format;
            self.time = time;
            self.bit_rate = bit_rate;
        }

        let frame_size = format.frame_size();
        let frames = (self.data.len() - self.length) / frame_size;
        let start = self.length;
        &mut self.data[start..start + frames * frame_size]
    }

    /// Commit `nbytes` written into the slice returned by
    /// [`MusicChunk::write`]. Returns `true` when the chunk is full.
    pub(crate) fn expand(&mut self, format: AudioFormat, nbytes: usize) -> bool {
        debug_assert!(self.length + nbytes <= self.data.len());
        self.length += nbytes;
        self.length + format.frame_size() > self.data.len()
    }
}

impl Drop for MusicChunk {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            // The pool may already be gone during shutdown.
            let _ = recycle.try_send(std::mem::take(&mut self.data));
        }
    }
}
