//! # Fluctuation Generator
//!
//! Adds the slow, random drift in pitch, loudness and tone colour that makes
//! processed speech sound less mechanical.
//!
//! ## How the drift is produced:
//! Every call draws a target `1.0 + Normal(0, variation)` and smooths it
//! against the previous factor:
//!
//! ```text
//! new = previous * smoothness + target * (1 - smoothness)
//! ```
//!
//! That is a first-order autoregressive process. With `smoothness = 0` every
//! factor is an independent draw; as `smoothness` approaches 1 the factor
//! barely moves between calls.
//!
//! ## Key Rust Concepts:
//! - **Seeded RNG**: `StdRng::seed_from_u64` makes a session reproducible in tests
//! - **&mut self**: Generation mutates the stored state, so callers must hold
//!   the generator exclusively (the registry wraps it in a mutex per session)
//! - **Copy state**: `FluctuationState` is a small `Copy` struct, cheap to snapshot

use crate::audio::eq::{self, BAND_COUNT};
use crate::audio::pitch;
use crate::error::{PipelineError, PipelineResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pitch factors are clamped to one octave either way before shifting.
const PITCH_FACTOR_RANGE: (f32, f32) = (0.5, 2.0);

/// Tunable parameters for one generator.
///
/// ## Fields:
/// - `pitch_variation`, `volume_variation`, `eq_variation`: standard deviations of
///   the Gaussian targets (must be finite and non-negative)
/// - `temporal_smoothness`: smoothing coefficient in [0, 1]
/// - `seed`: fixed seed for reproducible sessions; `None` seeds from the OS
/// - `apply_pitch`, `apply_eq`: whether `apply` also shifts pitch and re-balances bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluctuationConfig {
    pub pitch_variation: f32,
    pub volume_variation: f32,
    pub eq_variation: f32,
    pub temporal_smoothness: f32,
    pub seed: Option<u64>,
    pub apply_pitch: bool,
    pub apply_eq: bool,
}

impl Default for FluctuationConfig {
    fn default() -> Self {
        Self {
            pitch_variation: 0.05,
            volume_variation: 0.03,
            eq_variation: 0.02,
            temporal_smoothness: 0.8,
            seed: None,
            apply_pitch: false,
            apply_eq: false,
        }
    }
}

impl FluctuationConfig {
    /// Reject variations that are negative or non-finite and smoothness outside [0, 1].
    pub fn validate(&self) -> PipelineResult<()> {
        for (name, value) in [
            ("pitch_variation", self.pitch_variation),
            ("volume_variation", self.volume_variation),
            ("eq_variation", self.eq_variation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::Config(format!(
                    "{} must be a finite, non-negative standard deviation, got {}",
                    name, value
                )));
            }
        }

        let smoothness = self.temporal_smoothness;
        if !(0.0..=1.0).contains(&smoothness) {
            return Err(PipelineError::Config(format!(
                "temporal_smoothness must be within [0, 1], got {}",
                smoothness
            )));
        }

        Ok(())
    }
}

/// The generator's memory between calls. Every field starts at neutral (1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluctuationState {
    pub previous_pitch_factor: f32,
    pub previous_volume_factor: f32,
    pub previous_eq_factors: [f32; BAND_COUNT],
}

impl Default for FluctuationState {
    fn default() -> Self {
        Self {
            previous_pitch_factor: 1.0,
            previous_volume_factor: 1.0,
            previous_eq_factors: [1.0; BAND_COUNT],
        }
    }
}

/// Stateful source of smoothly drifting modulation factors.
pub struct FluctuationGenerator {
    config: FluctuationConfig,
    state: FluctuationState,
    rng: StdRng,
    pitch_dist: Normal<f32>,
    volume_dist: Normal<f32>,
    eq_dist: Normal<f32>,
}

impl FluctuationGenerator {
    /// Build a generator, validating the configuration first.
    ///
    /// ## Errors:
    /// Returns `PipelineError::Config` for invalid variations or smoothness.
    pub fn new(config: FluctuationConfig) -> PipelineResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            pitch_dist: gaussian(config.pitch_variation)?,
            volume_dist: gaussian(config.volume_variation)?,
            eq_dist: gaussian(config.eq_variation)?,
            config,
            state: FluctuationState::default(),
            rng,
        })
    }

    /// Next smoothed pitch factor (1.0 = unchanged).
    pub fn generate_pitch_factor(&mut self) -> f32 {
        let target = 1.0 + self.pitch_dist.sample(&mut self.rng);
        let factor = self.smooth(self.state.previous_pitch_factor, target);
        self.state.previous_pitch_factor = factor;
        factor
    }

    /// Next smoothed volume factor (1.0 = unchanged).
    pub fn generate_volume_factor(&mut self) -> f32 {
        let target = 1.0 + self.volume_dist.sample(&mut self.rng);
        let factor = self.smooth(self.state.previous_volume_factor, target);
        self.state.previous_volume_factor = factor;
        factor
    }

    /// Next smoothed gain for each EQ band, lowest band first.
    pub fn generate_eq_factors(&mut self) -> [f32; BAND_COUNT] {
        let mut factors = self.state.previous_eq_factors;
        for factor in factors.iter_mut() {
            let target = 1.0 + self.eq_dist.sample(&mut self.rng);
            *factor = self.smooth(*factor, target);
        }
        self.state.previous_eq_factors = factors;
        factors
    }

    /// Scale the whole buffer by one freshly generated volume factor.
    pub fn apply_volume_fluctuation(&mut self, samples: &[f32]) -> Vec<f32> {
        let factor = self.generate_volume_factor();
        samples.iter().map(|s| s * factor).collect()
    }

    /// Shift the buffer by one freshly generated pitch factor.
    ///
    /// The shift never fails the call; a buffer the shifter rejects comes back unchanged.
    pub fn apply_pitch_fluctuation(&mut self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let factor = self
            .generate_pitch_factor()
            .clamp(PITCH_FACTOR_RANGE.0, PITCH_FACTOR_RANGE.1);
        let semitones = 12.0 * factor.log2();
        match pitch::shift_pitch(samples, sample_rate, semitones) {
            Ok(shifted) => shifted,
            Err(e) => {
                debug!(error = %e, "Skipping pitch fluctuation for this buffer");
                samples.to_vec()
            }
        }
    }

    /// Re-balance the five bands with freshly generated gains.
    pub fn apply_eq_fluctuation(&mut self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let gains = self.generate_eq_factors();
        eq::apply_band_gains(samples, sample_rate, &gains)
    }

    /// Apply every enabled fluctuation: pitch and EQ when configured, then volume.
    pub fn apply(&mut self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let mut output = if self.config.apply_pitch {
            self.apply_pitch_fluctuation(samples, sample_rate)
        } else {
            samples.to_vec()
        };
        if self.config.apply_eq {
            output = self.apply_eq_fluctuation(&output, sample_rate);
        }
        self.apply_volume_fluctuation(&output)
    }

    /// Return every factor to neutral. The random source keeps its position.
    pub fn reset(&mut self) {
        self.state = FluctuationState::default();
    }

    pub fn state(&self) -> FluctuationState {
        self.state
    }

    pub fn config(&self) -> &FluctuationConfig {
        &self.config
    }

    fn smooth(&self, previous: f32, target: f32) -> f32 {
        let s = self.config.temporal_smoothness;
        previous * s + target * (1.0 - s)
    }
}

fn gaussian(std_dev: f32) -> PipelineResult<Normal<f32>> {
    Normal::new(0.0, std_dev).map_err(|e| PipelineError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64, smoothness: f32) -> FluctuationGenerator {
        FluctuationGenerator::new(FluctuationConfig {
            temporal_smoothness: smoothness,
            seed: Some(seed),
            ..Default::default()
        })
        .unwrap()
    }

    /// The raw `1 + N(0, sd)` targets a generator with `seed` would draw.
    fn raw_targets(seed: u64, std_dev: f32, count: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0f32, std_dev).unwrap();
        (0..count).map(|_| 1.0 + normal.sample(&mut rng)).collect()
    }

    fn step_variance(values: &[f32]) -> f32 {
        let steps: Vec<f32> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = steps.iter().sum::<f32>() / steps.len() as f32;
        steps.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / steps.len() as f32
    }

    #[test]
    fn test_zero_smoothness_matches_raw_targets() {
        let mut generator = seeded(7, 0.0);
        let produced: Vec<f32> = (0..64).map(|_| generator.generate_pitch_factor()).collect();
        assert_eq!(produced, raw_targets(7, 0.05, 64));
    }

    #[test]
    fn test_smoothing_reduces_step_variance() {
        let raw = raw_targets(42, 0.05, 500);
        let raw_variance = step_variance(&raw);

        for smoothness in [0.25, 0.5, 0.9] {
            let mut generator = seeded(42, smoothness);
            let smoothed: Vec<f32> = (0..500).map(|_| generator.generate_pitch_factor()).collect();
            assert!(
                step_variance(&smoothed) < raw_variance,
                "smoothness {} did not reduce step variance",
                smoothness
            );
        }
    }

    #[test]
    fn test_reset_restores_neutral_state() {
        let mut generator = seeded(11, 0.8);
        for _ in 0..3 {
            generator.generate_pitch_factor();
        }
        generator.generate_volume_factor();
        generator.generate_eq_factors();
        assert_ne!(generator.state(), FluctuationState::default());

        generator.reset();
        assert_eq!(generator.state(), FluctuationState::default());
    }

    #[test]
    fn test_reset_smooths_from_neutral() {
        let mut generator = seeded(11, 0.8);
        for _ in 0..3 {
            generator.generate_pitch_factor();
        }
        generator.reset();
        let after_reset = generator.generate_pitch_factor();

        // The fourth draw from the same seed, smoothed against 1.0.
        let target = raw_targets(11, 0.05, 4)[3];
        let expected = 1.0f32 * 0.8 + target * (1.0 - 0.8);
        assert!((after_reset - expected).abs() < 1e-7);
    }

    #[test]
    fn test_volume_fluctuation_is_linear() {
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin() * 0.4).collect();
        let scaled: Vec<f32> = input.iter().map(|s| s * 3.0).collect();

        let mut a = seeded(99, 0.5);
        let mut b = seeded(99, 0.5);
        let out_a = a.apply_volume_fluctuation(&input);
        let out_b = b.apply_volume_fluctuation(&scaled);

        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert!((x * 3.0 - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_volume_uses_one_factor_per_call() {
        let mut generator = seeded(5, 0.0);
        let output = generator.apply_volume_fluctuation(&[1.0, 1.0, 1.0]);
        assert_eq!(output[0], output[1]);
        assert_eq!(output[1], output[2]);
        assert_eq!(output[0], generator.state().previous_volume_factor);
    }

    #[test]
    fn test_eq_factors_are_smoothed_per_band() {
        let mut generator = seeded(3, 0.9);
        let factors = generator.generate_eq_factors();
        for factor in factors {
            // One step from 1.0 with weight 0.1 on a small Gaussian target.
            assert!((factor - 1.0).abs() < 0.05);
        }
        assert_eq!(generator.state().previous_eq_factors, factors);
    }

    #[test]
    fn test_apply_keeps_length_with_all_stages() {
        let mut generator = FluctuationGenerator::new(FluctuationConfig {
            apply_pitch: true,
            apply_eq: true,
            seed: Some(1),
            ..Default::default()
        })
        .unwrap();
        let input: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.1).sin() * 0.3).collect();
        assert_eq!(generator.apply(&input, 16000).len(), input.len());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let negative = FluctuationConfig { volume_variation: -0.1, ..Default::default() };
        assert!(matches!(FluctuationGenerator::new(negative), Err(PipelineError::Config(_))));

        let too_smooth = FluctuationConfig { temporal_smoothness: 1.5, ..Default::default() };
        assert!(FluctuationGenerator::new(too_smooth).is_err());

        let nan = FluctuationConfig { eq_variation: f32::NAN, ..Default::default() };
        assert!(nan.validate().is_err());
    }
}
