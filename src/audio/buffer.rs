//! # Sample Buffer
//!
//! The unit of audio that flows between pipeline stages: an owned vector of
//! mono samples plus the rate they were recorded at. Every stage keeps the
//! rate unchanged unless it explicitly resamples.

use crate::audio::resample::resample_linear;
use crate::error::{PipelineError, PipelineResult};

/// Mono audio samples with their sample rate.
///
/// ## Rust Concepts:
/// - **Vec<f32>**: Owned, growable sample storage
/// - **#[derive(Clone, PartialEq)]**: Buffers can be copied and compared in tests
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Samples as 32-bit floats, nominally in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Samples per second (Hz)
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the duration of the audio (in seconds).
    ///
    /// ## Calculation:
    /// Duration = number_of_samples / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Check that the buffer can be fed to a conversion stage.
    pub fn validate(&self) -> PipelineResult<()> {
        validate_samples(&self.samples, self.sample_rate)
    }

    /// Return a copy at `target_rate`, or `self` unchanged when the rate already matches.
    pub fn resampled(self, target_rate: u32) -> Self {
        if target_rate == 0 || target_rate == self.sample_rate {
            return self;
        }
        let samples = resample_linear(&self.samples, self.sample_rate, target_rate);
        Self::new(samples, target_rate)
    }
}

/// Check that samples can be fed to a conversion stage.
///
/// ## Checks:
/// - Sample rate is non-zero
/// - Every sample is finite (no NaN or infinity)
pub fn validate_samples(samples: &[f32], sample_rate: u32) -> PipelineResult<()> {
    if sample_rate == 0 {
        return Err(PipelineError::ConversionFailure(
            "sample rate must be greater than 0".to_string(),
        ));
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(PipelineError::ConversionFailure(format!(
            "non-finite sample at index {}",
            index
        )));
    }
    Ok(())
}
