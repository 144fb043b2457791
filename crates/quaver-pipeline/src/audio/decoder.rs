//! Symphonia-based decode to mono PCM.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PipelineError, PipelineResult};

/// Mono PCM at a fixed sample rate.
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_s: f64,
}

fn audio_err(what: &str, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::Audio(format!("{what}: {detail}"))
}

/// Decode an in-memory media blob to mono PCM at `target_sample_rate`,
/// averaging channels down to mono and linearly resampling.
pub fn decode_media(
    bytes: Vec<u8>,
    ext_hint: &str,
    target_sample_rate: u32,
) -> PipelineResult<DecodedAudio> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(bytes)),
        MediaSourceStreamOptions::default(),
    );

    let mut hint = Hint::new();
    if !ext_hint.is_empty() {
        hint.with_extension(ext_hint);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| audio_err("probe failed", e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::Audio("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| audio_err("unsupported codec", e))?;

    let mut sample_buf = None;
    let mut all_samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(audio_err("packet read failed", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                if sample_buf.is_none() {
                    let spec = *audio_buf.spec();
                    sample_buf = Some(SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(audio_buf);
                    all_samples.extend_from_slice(buf.samples());
                }
            }
            // corrupt frames are skipped, the stream usually recovers
            Err(symphonia::core::errors::Error::DecodeError(_)) => {}
            Err(e) => return Err(audio_err("decode failed", e)),
        }
    }

    let channels = codec_params.channels.map_or(1, |c| c.count());
    #[allow(clippy::cast_precision_loss)]
    let mono: Vec<f32> = if channels > 1 {
        all_samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        all_samples
    };

    let source_rate = codec_params.sample_rate.unwrap_or(44100);
    let samples = resample_linear(&mono, source_rate, target_sample_rate);

    #[allow(clippy::cast_precision_loss)]
    let duration_s = samples.len() as f64 / f64::from(target_sample_rate);

    Ok(DecodedAudio {
        samples,
        sample_rate: target_sample_rate,
        duration_s,
    })
}

/// Linear-interpolation resampler. Preview clips go straight into the
/// fingerprinter, which is robust to interpolation artifacts, so a real
/// windowed-sinc resampler buys nothing here.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        if idx + 1 < samples.len() {
            let frac = (pos - idx as f64) as f32;
            output.push(samples[idx].mul_add(1.0 - frac, samples[idx + 1] * frac));
        } else if idx < samples.len() {
            output.push(samples[idx]);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(resample_linear(&samples, 44100, 44100), samples);
    }

    #[test]
    fn resample_halves_and_doubles() {
        assert_eq!(resample_linear(&[1.0, 2.0, 3.0, 4.0], 44100, 22050).len(), 2);
        assert_eq!(resample_linear(&[1.0, 2.0], 22050, 44100).len(), 4);
    }

    #[test]
    fn garbage_bytes_fail_to_probe() {
        let result = decode_media(vec![0u8; 256], "mp3", 11025);
        assert!(matches!(result, Err(PipelineError::Audio(_))));
    }
}
