//! # Pitch Shifting
//!
//! Deterministic, length-preserving pitch shifter used whenever no inference
//! model is available (demo mode) and by pitch fluctuation.
//!
//! ## How it works:
//! The output is built from Hann-windowed grains laid out at 50% overlap.
//! Each grain reads the input around its own centre at `ratio` speed, so its
//! content is transposed by `ratio` while the grain stays anchored in time.
//! A periodic Hann window at half-grain hop sums to exactly 1, which makes a
//! ratio of 1.0 reproduce the input sample for sample.

use crate::audio::resample::interpolate_at;
use crate::error::{PipelineError, PipelineResult};
use std::f64::consts::PI;

/// Grain length in seconds.
const GRAIN_SECONDS: f64 = 0.04;

/// Smallest grain we accept at very low sample rates.
const MIN_GRAIN_SAMPLES: usize = 64;

/// Convert a semitone offset into a frequency ratio (`2^(st/12)`).
pub fn semitones_to_ratio(semitones: f32) -> f64 {
    2f64.powf(semitones as f64 / 12.0)
}

/// Shift `samples` by `semitones` without changing their length.
///
/// ## Returns:
/// - **Ok(samples)**: shifted audio, same length as the input
/// - **Err(ConversionFailure)**: zero sample rate, non-finite shift or non-finite samples
///
/// A shift of exactly 0 returns the input unchanged without inspecting it.
pub fn shift_pitch(samples: &[f32], sample_rate: u32, semitones: f32) -> PipelineResult<Vec<f32>> {
    if semitones == 0.0 {
        return Ok(samples.to_vec());
    }
    if !semitones.is_finite() {
        return Err(PipelineError::ConversionFailure(format!(
            "pitch shift must be finite, got {}",
            semitones
        )));
    }
    if sample_rate == 0 {
        return Err(PipelineError::ConversionFailure(
            "cannot pitch-shift audio with a sample rate of 0".to_string(),
        ));
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(PipelineError::ConversionFailure(
            "cannot pitch-shift a buffer containing non-finite samples".to_string(),
        ));
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let ratio = semitones_to_ratio(semitones);
    let grain = grain_length(sample_rate);
    let hop = grain / 2;
    let window = hann_window(grain);
    let len = samples.len() as isize;

    let mut output = vec![0.0f32; samples.len()];
    let mut start = -(hop as isize);
    while start < len {
        let centre = start as f64 + hop as f64;
        for (i, weight) in window.iter().enumerate() {
            let position = start + i as isize;
            if position < 0 || position >= len {
                continue;
            }
            let source = centre + (i as f64 - hop as f64) * ratio;
            output[position as usize] += weight * interpolate_at(samples, source);
        }
        start += hop as isize;
    }

    Ok(output)
}

fn grain_length(sample_rate: u32) -> usize {
    let grain = ((sample_rate as f64 * GRAIN_SECONDS) as usize).max(MIN_GRAIN_SAMPLES);
    // Even length keeps the half-grain hop exact.
    grain + grain % 2
}

/// Periodic Hann window; consecutive copies at half-length hop sum to 1.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / length as f64).cos()) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let count = (sample_rate as f32 * seconds) as usize;
        (0..count)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count()
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let input = sine(440.0, 16000, 0.25);
        assert_eq!(shift_pitch(&input, 16000, 0.0).unwrap(), input);
    }

    #[test]
    fn test_unit_ratio_grains_reconstruct_input() {
        // A tiny shift keeps the overlap-add sum at unity gain.
        let input = sine(220.0, 16000, 0.25);
        let output = shift_pitch(&input, 16000, 1e-6).unwrap();
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_shift_preserves_length() {
        let input = sine(300.0, 22050, 0.3);
        for semitones in [-12.0, -3.0, 5.0, 12.0] {
            let output = shift_pitch(&input, 22050, semitones).unwrap();
            assert_eq!(output.len(), input.len());
        }
    }

    #[test]
    fn test_octave_up_raises_frequency() {
        let input = sine(220.0, 16000, 1.0);
        let output = shift_pitch(&input, 16000, 12.0).unwrap();
        let before = zero_crossings(&input) as f32;
        let after = zero_crossings(&output) as f32;
        assert!(after > before * 1.5, "crossings went from {} to {}", before, after);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(shift_pitch(&[0.1, 0.2], 0, 3.0).is_err());
        assert!(shift_pitch(&[0.1, f32::INFINITY], 16000, 3.0).is_err());
        assert!(shift_pitch(&[0.1], 16000, f32::NAN).is_err());
    }

    #[test]
    fn test_semitone_ratio() {
        assert!((semitones_to_ratio(12.0) - 2.0).abs() < 1e-12);
        assert!((semitones_to_ratio(-12.0) - 0.5).abs() < 1e-12);
    }
}
