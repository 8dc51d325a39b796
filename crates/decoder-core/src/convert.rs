//! PCM format conversion between what a plugin produces and what the pipe
//! carries.
//!
//! Samples go through interleaved `f32`: decode the source encoding, map the
//! channel layout, resample with Rubato when the rates differ, encode into
//! the target encoding.

use anyhow::{Result, anyhow, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use decoder_types::{AudioFormat, SampleFormat};
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Resampler input block size used by [`PcmConvert::new`].
pub const DEFAULT_RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Converts interleaved PCM from one [`AudioFormat`] to another.
pub struct PcmConvert {
    in_format: AudioFormat,
    out_format: AudioFormat,
    resampler: Option<StreamResampler>,
    mapped: Vec<f32>,
    resampled: Vec<f32>,
}

impl PcmConvert {
    pub fn new(in_format: AudioFormat, out_format: AudioFormat) -> Result<Self> {
        Self::with_resample_chunk(in_format, out_format, DEFAULT_RESAMPLE_CHUNK_FRAMES)
    }

    pub fn with_resample_chunk(
        in_format: AudioFormat,
        out_format: AudioFormat,
        chunk_frames: usize,
    ) -> Result<Self> {
        if !in_format.is_valid() {
            bail!("invalid source format {in_format}");
        }
        if !out_format.is_valid() {
            bail!("invalid target format {out_format}");
        }

        let resampler = if in_format.sample_rate != out_format.sample_rate {
            tracing::info!(
                from_hz = in_format.sample_rate,
                to_hz = out_format.sample_rate,
                chunk_frames,
                "resampling"
            );
            Some(StreamResampler::new(
                in_format.sample_rate,
                out_format.sample_rate,
                out_format.channels as usize,
                chunk_frames.max(1),
            )?)
        } else {
            None
        };

        Ok(Self {
            in_format,
            out_format,
            resampler,
            mapped: Vec::new(),
            resampled: Vec::new(),
        })
    }

    pub fn in_format(&self) -> AudioFormat {
        self.in_format
    }

    pub fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    /// Convert whole source frames. Trailing bytes of a partial frame are
    /// ignored.
    ///
    /// With resampling, output lags input by up to one resampler block; the
    /// remainder comes out of [`PcmConvert::flush`].
    pub fn convert(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        self.mapped.clear();
        map_channels(
            src,
            self.in_format,
            self.out_format.channels as usize,
            &mut self.mapped,
        );

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(&self.mapped, &mut self.resampled)?;
                Ok(encode(&self.resampled, self.out_format.format))
            }
            None => Ok(encode(&self.mapped, self.out_format.format)),
        }
    }

    /// Emit audio still held by the resampler at the end of the stream.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        self.resampled.clear();
        resampler.flush(&mut self.resampled)?;
        Ok(encode(&self.resampled, self.out_format.format))
    }

    /// Forget buffered state; used after a seek.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// Rubato's streaming sinc resampler fed with arbitrary-sized input.
struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl StreamResampler {
    fn new(from_hz: u32, to_hz: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let inner = Async::<f32>::new_sinc(
            to_hz as f64 / from_hz as f64,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        let out = vec![0.0f32; inner.output_frames_max() * channels];

        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::new(),
            out,
        })
    }

    fn process(&mut self, input: &[f32], dst: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);

        let block = self.chunk_frames * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= block {
            let produced = self.run(consumed, self.chunk_frames, None)?;
            dst.extend_from_slice(&self.out[..produced]);
            consumed += block;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    fn flush(&mut self, dst: &mut Vec<f32>) -> Result<()> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: Some(tail_frames),
            };
            let produced = self.run(0, tail_frames, Some(&indexing))?;
            dst.extend_from_slice(&self.out[..produced]);
        }
        self.reset();
        Ok(())
    }

    /// Resample `frames` frames starting at sample `start` of `pending` into
    /// `out`; returns the number of output samples.
    fn run(&mut self, start: usize, frames: usize, indexing: Option<&Indexing>) -> Result<usize> {
        let input = &self.pending[start..start + frames * self.channels];
        let input = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

        let out_frames = self.out.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
            .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input, &mut output, indexing)
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        Ok(nbr_out * self.channels)
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
    }
}

/// Decode `src` to `f32` and map it to `dst_channels`.
///
/// mono → stereo duplicates, stereo → mono averages, other layouts keep
/// matching channels and repeat the last source channel.
fn map_channels(src: &[u8], format: AudioFormat, dst_channels: usize, dst: &mut Vec<f32>) {
    let src_channels = format.channels as usize;
    let frame_size = format.frame_size();
    let sample_size = format.sample_size();

    for frame in src.chunks_exact(frame_size) {
        let sample = |ch: usize| {
            let at = ch.min(src_channels - 1) * sample_size;
            decode_sample(&frame[at..at + sample_size], format.format)
        };
        match (src_channels, dst_channels) {
            (2, 1) => dst.push(0.5 * (sample(0) + sample(1))),
            _ => dst.extend((0..dst_channels).map(sample)),
        }
    }
}

fn decode_sample(b: &[u8], format: SampleFormat) -> f32 {
    match format {
        SampleFormat::S8 => i8::from_ne_bytes([b[0]]) as f32 / 128.0,
        SampleFormat::S16 => i16::from_ne_bytes([b[0], b[1]]) as f32 / 32_768.0,
        SampleFormat::S24P32 => {
            i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 8_388_608.0
        }
        SampleFormat::S32 => {
            (i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64 / 2_147_483_648.0) as f32
        }
        SampleFormat::Float => f32::from_ne_bytes([b[0], b[1], b[2], b[3]]),
        SampleFormat::Undefined => 0.0,
    }
}

fn encode(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.sample_size());
    for &s in samples {
        match format {
            SampleFormat::S8 => {
                out.push(((s * 128.0).round().clamp(-128.0, 127.0) as i8) as u8);
            }
            SampleFormat::S16 => out.extend_from_slice(
                &((s * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16).to_ne_bytes(),
            ),
            SampleFormat::S24P32 => out.extend_from_slice(
                &((s * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32)
                    .to_ne_bytes(),
            ),
            SampleFormat::S32 => out.extend_from_slice(
                &((s as f64 * 2_147_483_648.0)
                    .round()
                    .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32)
                    .to_ne_bytes(),
            ),
            SampleFormat::Float => out.extend_from_slice(&s.to_ne_bytes()),
            SampleFormat::Undefined => {}
        }
    }
    out
}
