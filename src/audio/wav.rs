//! # WAV Codec
//!
//! Turns uploaded bytes into a mono [`SampleBuffer`] and back.
//!
//! ## Accepted input:
//! - **WAV** (`RIFF` header): any channel count, 8/16/24/32-bit integer or
//!   32-bit float samples; multi-channel audio is averaged down to mono
//! - **Raw PCM**: anything else is read as 16-bit little-endian mono at a
//!   caller-supplied sample rate
//!
//! ## Output:
//! Always 16-bit mono PCM WAV at the buffer's sample rate.

use crate::audio::SampleBuffer;
use crate::error::{PipelineError, PipelineResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

const RIFF_MAGIC: &[u8; 4] = b"RIFF";

/// Decode an upload: WAV when it carries a RIFF header, raw PCM16 otherwise.
pub fn decode(bytes: &[u8], raw_sample_rate: u32) -> PipelineResult<SampleBuffer> {
    if bytes.starts_with(RIFF_MAGIC) {
        decode_wav(bytes)
    } else {
        decode_raw_pcm16(bytes, raw_sample_rate)
    }
}

/// Decode WAV bytes into mono samples.
pub fn decode_wav(bytes: &[u8]) -> PipelineResult<SampleBuffer> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    read_samples(reader)
}

/// Decode headerless 16-bit little-endian mono PCM.
///
/// ## Conversion:
/// Samples are scaled from [-32768, 32767] to [-1.0, 1.0).
pub fn decode_raw_pcm16(bytes: &[u8], sample_rate: u32) -> PipelineResult<SampleBuffer> {
    if bytes.is_empty() {
        return Err(PipelineError::Codec("no audio data provided".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(PipelineError::Codec(
            "raw PCM length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(SampleBuffer::new(samples, sample_rate))
}

/// Encode a buffer as 16-bit mono WAV bytes.
pub fn encode_wav(buffer: &SampleBuffer) -> PipelineResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, output_spec(buffer.sample_rate))?;
        write_samples(&mut writer, &buffer.samples)?;
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Read a WAV file from disk as mono.
pub fn read_file(path: &Path) -> PipelineResult<SampleBuffer> {
    let reader = hound::WavReader::open(path)?;
    read_samples(reader)
}

/// Write a buffer to disk as 16-bit mono WAV.
pub fn write_file(path: &Path, buffer: &SampleBuffer) -> PipelineResult<()> {
    let mut writer = hound::WavWriter::create(path, output_spec(buffer.sample_rate))?;
    write_samples(&mut writer, &buffer.samples)?;
    writer.finalize()?;
    Ok(())
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn read_samples<R: Read>(mut reader: hound::WavReader<R>) -> PipelineResult<SampleBuffer> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(PipelineError::Codec("WAV header declares zero channels".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(SampleBuffer::new(
        downmix(&interleaved, spec.channels),
        spec.sample_rate,
    ))
}

fn write_samples<W: Write + Seek>(
    writer: &mut hound::WavWriter<W>,
    samples: &[f32],
) -> PipelineResult<()> {
    for &sample in samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    Ok(())
}

/// Inverse of the decode scaling, so PCM16 input survives a round trip bit for bit.
fn to_pcm16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

fn output_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let data = make_wav_data(16000, 1, &[16384, -16384, 0]);
        let buffer = decode(&data, 44100).unwrap();
        assert_eq!(buffer.sample_rate, 16000);
        assert_eq!(buffer.samples, vec![0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_decode_stereo_downmixes() {
        // Stereo pairs: (16384, 0), (-16384, -16384)
        let data = make_wav_data(22050, 2, &[16384, 0, -16384, -16384]);
        let buffer = decode_wav(&data).unwrap();
        assert_eq!(buffer.sample_rate, 22050);
        assert_eq!(buffer.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_raw_pcm_fallback() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16384i16.to_le_bytes());
        bytes.extend_from_slice(&(-32768i16).to_le_bytes());
        let buffer = decode(&bytes, 16000).unwrap();
        assert_eq!(buffer.sample_rate, 16000);
        assert_eq!(buffer.samples, vec![0.5, -1.0]);

        assert!(decode(&bytes[..3], 16000).is_err());
        assert!(decode(&[], 16000).is_err());
    }

    #[test]
    fn test_encode_then_decode_preserves_audio() {
        let samples: Vec<f32> = (0..1600)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let buffer = SampleBuffer::new(samples, 16000);

        let bytes = encode_wav(&buffer).unwrap();
        assert!(bytes.starts_with(b"RIFF"));

        let decoded = decode(&bytes, 8000).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.len(), buffer.len());
        for (a, b) in buffer.samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_full_scale_pcm16_is_bit_exact() {
        let original = [32000i16, -32768, 20000, 16384, 32767, -1, 1, 0];
        let decoded = decode_wav(&make_wav_data(16000, 1, &original)).unwrap();
        let encoded = encode_wav(&decoded).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(encoded)).unwrap();
        let written: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(written, original);
    }

    #[test]
    fn test_non_finite_samples_encode_as_silence() {
        assert_eq!(to_pcm16(f32::NAN), 0);
        assert_eq!(to_pcm16(f32::INFINITY), 0);
        assert_eq!(to_pcm16(1.5), i16::MAX);
        assert_eq!(to_pcm16(-1.5), i16::MIN);
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("makebeliv-wav-{}.wav", uuid::Uuid::new_v4()));
        let buffer = SampleBuffer::new(vec![0.0, 0.25, -0.25, 2.0], 8000);

        write_file(&path, &buffer).unwrap();
        let decoded = read_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(decoded.sample_rate, 8000);
        // Out-of-range samples are clipped on write.
        assert!((decoded.samples[3] - 1.0).abs() < 1e-4);
        assert!((decoded.samples[1] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_garbage_riff_is_codec_error() {
        let err = decode(b"RIFF\x00\x00", 16000).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(_)));
    }
}
