//! Container and codec decoding through Symphonia.
//!
//! Symphonia pulls bytes from the input stream itself, so reads are not
//! interrupted by commands; commands are checked between packets.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use decoder_types::{AudioFormat, DecoderCommand, ReplayGainInfo, SampleFormat, Tag, TagType};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::{DecoderPlugin, uri_suffix};
use crate::client::{DecoderClient, ReadCancel};
use crate::input::InputStreamPtr;

pub struct SymphoniaDecoderPlugin;

impl DecoderPlugin for SymphoniaDecoderPlugin {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn suffixes(&self) -> &[&'static str] {
        &[
            "flac", "mp3", "m4a", "aac", "alac", "wav", "wave", "aif", "aiff", "ogg", "oga",
        ]
    }

    fn mime_types(&self) -> &[&'static str] {
        &[
            "audio/flac",
            "audio/x-flac",
            "audio/mpeg",
            "audio/mp4",
            "audio/aac",
            "audio/wav",
            "audio/x-wav",
            "audio/aiff",
            "audio/x-aiff",
            "audio/ogg",
        ]
    }

    fn stream_decode(&self, client: &mut dyn DecoderClient, input: InputStreamPtr) -> Result<()> {
        let mut hint = Hint::new();
        if let Some(suffix) = uri_suffix(input.uri()) {
            hint.with_extension(suffix);
        }
        if let Some(mime) = input.mime_type() {
            hint.mime_type(mime);
        }
        let uri = input.uri().to_string();
        let seekable = input.is_seekable();

        let source = InputSource {
            input,
            cancel: client.read_cancel(),
        };
        let mss = MediaSourceStream::new(Box::new(source), Default::default());
        let probed = match symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        ) {
            Ok(probed) => probed,
            Err(err) => {
                // Not a format we know; let the next plugin try.
                tracing::debug!(%uri, "symphonia probe failed: {err}");
                return Ok(());
            }
        };

        let mut format = probed.format;
        let mut probe_metadata = probed.metadata;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let channels = u8::try_from(channels).context("channel count")?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .with_context(|| format!("create decoder for {uri}"))?;

        tracing::debug!(
            %uri,
            codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
            rate,
            channels,
            "symphonia stream opened"
        );
        client.ready(
            AudioFormat::new(rate, SampleFormat::Float, channels),
            seekable,
            duration_from_codec_params(&codec_params),
        );

        // Tags found before the container (e.g. ID3v2), then the container's own.
        let mut revisions = Vec::new();
        if let Some(revision) = probe_metadata
            .get()
            .as_ref()
            .and_then(|metadata| metadata.current())
        {
            revisions.push(convert_revision(revision));
        }
        if let Some(revision) = format.metadata().current() {
            revisions.push(convert_revision(revision));
        }
        for (tag, replay_gain) in revisions {
            if submit_metadata(client, tag, replay_gain) == DecoderCommand::Stop {
                return Ok(());
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        loop {
            match client.get_command() {
                DecoderCommand::Stop => break,
                DecoderCommand::Seek => {
                    let target = client.get_seek_time();
                    let time = Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1e9);
                    match format.seek(
                        SeekMode::Accurate,
                        SeekTo::Time {
                            time,
                            track_id: Some(track_id),
                        },
                    ) {
                        Ok(_) => {
                            decoder.reset();
                            client.command_finished();
                        }
                        Err(err) => {
                            tracing::warn!(%uri, ?target, "symphonia seek failed: {err}");
                            client.seek_error();
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(err) => return Err(err).with_context(|| format!("read packet from {uri}")),
            };

            let mut updates = Vec::new();
            {
                let mut metadata = format.metadata();
                while !metadata.is_latest() {
                    metadata.pop();
                    if let Some(revision) = metadata.current() {
                        updates.push(convert_revision(revision));
                    }
                }
            }
            for (tag, replay_gain) in updates {
                if submit_metadata(client, tag, replay_gain) == DecoderCommand::Stop {
                    return Ok(());
                }
            }

            if packet.track_id() != track_id {
                continue;
            }
            let packet_bytes = packet.buf().len() as u64;

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::warn!(%uri, "skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => return Err(err).with_context(|| format!("decode {uri}")),
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            if decoded.spec().channels.count() != channels as usize {
                anyhow::bail!("channel count changed mid-stream in {uri}");
            }

            let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);

            bytes.clear();
            bytes.extend(sample_buf.samples().iter().flat_map(|s| s.to_ne_bytes()));

            let kbit_rate =
                (packet_bytes * 8 * rate as u64 / (frames as u64 * 1000)).min(u16::MAX as u64);
            if client.submit_audio(None, &bytes, kbit_rate as u16) == DecoderCommand::Stop {
                break;
            }
        }

        Ok(())
    }
}

fn submit_metadata(
    client: &mut dyn DecoderClient,
    tag: Tag,
    replay_gain: Option<ReplayGainInfo>,
) -> DecoderCommand {
    if let Some(info) = replay_gain {
        client.submit_replay_gain(Some(&info));
    }
    if tag.is_empty() {
        return DecoderCommand::None;
    }
    client.submit_tag(None, tag)
}

/// Adapts an [`InputStreamPtr`] to Symphonia's [`MediaSource`].
///
/// A STOP reads as end of stream, so Symphonia winds down the way it does at
/// the end of a file.
struct InputSource {
    input: InputStreamPtr,
    cancel: Arc<dyn ReadCancel>,
}

impl Read for InputSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Ok(0);
        }
        self.input
            .read(buf)
            .map_err(|err| io::Error::other(format!("{err:#}")))
    }
}

impl Seek for InputSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.input.offset().checked_add_signed(delta),
            SeekFrom::End(delta) => self
                .input
                .size()
                .and_then(|size| size.checked_add_signed(delta)),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek position",
            ));
        };
        self.input
            .seek(target)
            .map_err(|err| io::Error::other(format!("{err:#}")))?;
        Ok(target)
    }
}

impl MediaSource for InputSource {
    fn is_seekable(&self) -> bool {
        self.input.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.input.size()
    }
}

/// Tag items and replay gain values of one metadata revision.
fn convert_revision(revision: &MetadataRevision) -> (Tag, Option<ReplayGainInfo>) {
    let mut tag = Tag::new();
    let mut replay_gain = ReplayGainInfo::default();
    let mut has_replay_gain = false;

    for item in revision.tags() {
        let Some(key) = item.std_key else {
            continue;
        };
        let value = item.value.to_string();

        let slot = match key {
            StandardTagKey::ReplayGainTrackGain => Some(&mut replay_gain.track.gain),
            StandardTagKey::ReplayGainTrackPeak => Some(&mut replay_gain.track.peak),
            StandardTagKey::ReplayGainAlbumGain => Some(&mut replay_gain.album.gain),
            StandardTagKey::ReplayGainAlbumPeak => Some(&mut replay_gain.album.peak),
            _ => None,
        };
        if let Some(slot) = slot {
            if let Some(parsed) = parse_replay_gain_value(&value) {
                *slot = parsed;
                has_replay_gain = true;
            }
            continue;
        }

        if let Some(kind) = tag_type_from_key(key) {
            tag.add_item(kind, value);
        }
    }

    (tag, has_replay_gain.then_some(replay_gain))
}

fn tag_type_from_key(key: StandardTagKey) -> Option<TagType> {
    let kind = match key {
        StandardTagKey::Artist => TagType::Artist,
        StandardTagKey::SortArtist => TagType::ArtistSort,
        StandardTagKey::Album => TagType::Album,
        StandardTagKey::SortAlbum => TagType::AlbumSort,
        StandardTagKey::AlbumArtist => TagType::AlbumArtist,
        StandardTagKey::SortAlbumArtist => TagType::AlbumArtistSort,
        StandardTagKey::TrackTitle => TagType::Title,
        StandardTagKey::TrackNumber => TagType::Track,
        StandardTagKey::Genre => TagType::Genre,
        StandardTagKey::Date => TagType::Date,
        StandardTagKey::OriginalDate => TagType::OriginalDate,
        StandardTagKey::Composer => TagType::Composer,
        StandardTagKey::Performer => TagType::Performer,
        StandardTagKey::Comment => TagType::Comment,
        StandardTagKey::DiscNumber => TagType::Disc,
        StandardTagKey::Label => TagType::Label,
        StandardTagKey::MusicBrainzTrackId => TagType::MusicBrainzTrackId,
        StandardTagKey::MusicBrainzAlbumId => TagType::MusicBrainzAlbumId,
        _ => return None,
    };
    Some(kind)
}

/// Parse `"-6.50 dB"` or `"0.988"`.
fn parse_replay_gain_value(value: &str) -> Option<f32> {
    value.split_whitespace().next()?.parse().ok()
}

/// Best-effort duration from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_from_codec_params(codec_params: &CodecParameters) -> Option<Duration> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_millis(frames.saturating_mul(1000) / rate))
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
