//! Decode an in-memory audio attachment into mono `f32` at the engine's sample rate.
//!
//! Voicemail systems send WAV files in a handful of encodings (16-bit PCM, G.711 A-law and
//! µ-law, IMA ADPCM) and at telephone sample rates. We let Symphonia probe and decode the
//! container, downmix to mono, and hand anything that is not already at the target rate to
//! [`crate::resample`].
//!
//! The whole attachment is decoded into one buffer. Attachments are processed one at a time,
//! so peak memory is a single voicemail.

use std::io::Cursor;

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::resample::resample_mono;

/// Sample rate the speech-to-text engine expects (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode `bytes` into mono samples at [`TARGET_SAMPLE_RATE`], normalized to `[-1.0, 1.0]`.
///
/// A valid container with no audio frames decodes to an empty buffer. Empty input, an
/// unrecognised container, or an unsupported codec is an error.
pub fn decode_to_mono(bytes: &[u8], hint_extension: Option<&str>) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        bail!("audio attachment is empty");
    }

    let (mut format, track) = probe(bytes, hint_extension)?;
    let mut decoder = make_decoder(&track)?;

    let mut src_rate = track.codec_params.sample_rate;
    let mut scratch: Option<SampleBuffer<f32>> = None;
    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            // End of stream.
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(anyhow!(e)).context("failed reading packet"),
        };

        if packet.track_id() != track.id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                src_rate = Some(decoded.spec().rate);
                append_mono(&decoded, &mut scratch, &mut mono)?;
            }
            // A corrupt frame; keep going with the rest.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(anyhow!(e)).context("decoder failure"),
        }
    }

    if mono.is_empty() {
        return Ok(mono);
    }

    let src_rate = src_rate.ok_or_else(|| anyhow!("audio track has no sample rate"))?;
    if src_rate == TARGET_SAMPLE_RATE {
        return Ok(mono);
    }

    resample_mono(&mono, src_rate, TARGET_SAMPLE_RATE)
}

fn probe(bytes: &[u8], hint_extension: Option<&str>) -> Result<(Box<dyn FormatReader>, Track)> {
    let source = Box::new(Cursor::new(bytes.to_vec()));
    let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = hint_extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!(e))
        .context("failed to probe audio container")?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .cloned()
        .ok_or_else(|| anyhow!("no audio track found"))?;

    Ok((format, track))
}

fn make_decoder(track: &Track) -> Result<Box<dyn Decoder>> {
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!(e))
        .context("unsupported audio codec")
}

/// Copy one decoded buffer into `mono`, averaging channels with equal weight.
fn append_mono(
    decoded: &AudioBufferRef<'_>,
    scratch: &mut Option<SampleBuffer<f32>>,
    mono: &mut Vec<f32>,
) -> Result<()> {
    let spec = *decoded.spec();
    let channels = spec.channels.count();
    if channels == 0 {
        bail!("decoded audio had zero channels");
    }

    // Reallocate only when a packet is larger than anything seen so far.
    let needed = decoded.capacity() * channels;
    if scratch.as_ref().is_none_or(|buf| buf.capacity() < needed) {
        *scratch = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    let buf = scratch
        .as_mut()
        .ok_or_else(|| anyhow!("sample buffer not initialized"))?;

    buf.copy_interleaved_ref(decoded.clone());
    downmix_into(buf.samples(), channels, mono);
    Ok(())
}

fn downmix_into(interleaved: &[f32], channels: usize, mono: &mut Vec<f32>) {
    if channels == 1 {
        mono.extend_from_slice(interleaved);
        return;
    }

    mono.reserve(interleaved.len() / channels);
    for frame in interleaved.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() / channels as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for i in 0..frames {
                let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).expect("write sample");
                }
            }
            writer.finalize().expect("finalize wav");
        }
        cursor.into_inner()
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = decode_to_mono(&[], Some("wav")).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn garbage_input_fails_to_probe() {
        let err = decode_to_mono(b"definitely not a riff file", Some("wav")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to probe audio container"));
    }

    #[test]
    fn mono_16k_passes_through_unchanged_in_length() -> anyhow::Result<()> {
        let bytes = wav_bytes(TARGET_SAMPLE_RATE, 1, 16_000);
        let samples = decode_to_mono(&bytes, Some("wav"))?;
        assert_eq!(samples.len(), 16_000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        Ok(())
    }

    #[test]
    fn stereo_is_downmixed() -> anyhow::Result<()> {
        let bytes = wav_bytes(TARGET_SAMPLE_RATE, 2, 4_000);
        let samples = decode_to_mono(&bytes, None)?;
        assert_eq!(samples.len(), 4_000);
        Ok(())
    }

    #[test]
    fn telephone_rate_is_resampled_to_target() -> anyhow::Result<()> {
        let bytes = wav_bytes(8_000, 1, 8_000);
        let samples = decode_to_mono(&bytes, Some("wav"))?;
        assert_eq!(samples.len(), 16_000);
        Ok(())
    }

    #[test]
    fn downmix_averages_channels() {
        let mut mono = Vec::new();
        downmix_into(&[1.0, 3.0, -1.0, 1.0], 2, &mut mono);
        assert_eq!(mono, vec![2.0, 0.0]);
    }
}
