use std::time::Duration;

use anyhow::Result;
use decoder_types::{AudioFormat, DecoderCommand, SampleFormat};

use super::DecoderPlugin;
use crate::client::DecoderClient;
use crate::input::InputStreamPtr;

const FLOAT_PCM_MIME: &str = "audio/x-mpd-float-pcm";

/// Headerless interleaved PCM in native byte order.
///
/// The format cannot be detected, so it is fixed per plugin instance;
/// [`FLOAT_PCM_MIME`] switches the sample format to 32 bit float.
pub struct PcmDecoderPlugin {
    format: AudioFormat,
}

impl PcmDecoderPlugin {
    pub fn new(format: AudioFormat) -> Self {
        debug_assert!(format.is_valid());
        Self { format }
    }

    fn format_for(&self, mime_type: Option<&str>) -> AudioFormat {
        match mime_type {
            Some(mime) if mime.eq_ignore_ascii_case(FLOAT_PCM_MIME) => AudioFormat {
                format: SampleFormat::Float,
                ..self.format
            },
            _ => self.format,
        }
    }
}

impl Default for PcmDecoderPlugin {
    /// CD audio: `44100:16:2`.
    fn default() -> Self {
        Self::new(AudioFormat::new(44_100, SampleFormat::S16, 2))
    }
}

impl DecoderPlugin for PcmDecoderPlugin {
    fn name(&self) -> &'static str {
        "pcm"
    }

    fn suffixes(&self) -> &[&'static str] {
        &["raw", "pcm"]
    }

    fn mime_types(&self) -> &[&'static str] {
        &["audio/x-mpd-raw-pcm", FLOAT_PCM_MIME]
    }

    fn stream_decode(&self, client: &mut dyn DecoderClient, mut input: InputStreamPtr) -> Result<()> {
        let format = self.format_for(input.mime_type());
        let frame_size = format.frame_size();
        let duration = input
            .size()
            .map(|size| Duration::from_secs_f64(format.size_to_seconds(size as usize)));
        let kbit_rate = (format.sample_rate as u64 * frame_size as u64 * 8 / 1000)
            .min(u16::MAX as u64) as u16;

        client.ready(format, input.is_seekable(), duration);

        let mut buf = vec![0u8; (4096 / frame_size).max(1) * frame_size];
        // Bytes of an incomplete frame carried over to the next read.
        let mut fill = 0;

        loop {
            match client.get_command() {
                DecoderCommand::Stop => break,
                DecoderCommand::Seek => {
                    let frame = client.get_seek_frame();
                    match input.seek(frame * frame_size as u64) {
                        Ok(()) => {
                            fill = 0;
                            client.command_finished();
                        }
                        Err(err) => {
                            tracing::warn!(uri = input.uri(), "pcm seek failed: {err:#}");
                            client.seek_error();
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let n = client.read(input.as_mut(), &mut buf[fill..]);
            if n == 0 {
                if client.get_command() == DecoderCommand::None {
                    break;
                }
                continue;
            }

            fill += n;
            let whole = fill - fill % frame_size;
            if whole == 0 {
                continue;
            }
            let command = client.submit_audio(Some(input.as_mut()), &buf[..whole], kbit_rate);
            buf.copy_within(whole..fill, 0);
            fill -= whole;

            if command == DecoderCommand::Stop {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_mime_switches_sample_format() {
        let plugin = PcmDecoderPlugin::default();
        assert_eq!(plugin.format_for(None).format, SampleFormat::S16);
        let float = plugin.format_for(Some("audio/x-mpd-float-pcm"));
        assert_eq!(float.format, SampleFormat::Float);
        assert_eq!(float.sample_rate, 44_100);
        assert_eq!(float.channels, 2);
    }
}
