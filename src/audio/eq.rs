//! Five-band gain stage used by EQ fluctuation.
//!
//! Bands come from differences of cascaded-cutoff one-pole low-passes, so
//! they sum back to the input exactly and unit gains are transparent.

/// Number of EQ bands.
pub const BAND_COUNT: usize = 5;

/// Upper edges (Hz) of the four lower bands; the fifth band is everything above.
pub const BAND_EDGES_HZ: [f32; BAND_COUNT - 1] = [250.0, 800.0, 2500.0, 6000.0];

/// Apply one gain per band to `samples`.
pub fn apply_band_gains(samples: &[f32], sample_rate: u32, gains: &[f32; BAND_COUNT]) -> Vec<f32> {
    if samples.is_empty() || sample_rate == 0 {
        return samples.to_vec();
    }
    if gains.iter().all(|&g| g == 1.0) {
        return samples.to_vec();
    }

    let mut lowpasses: Vec<OnePole> = BAND_EDGES_HZ
        .iter()
        .map(|&edge| OnePole::new(edge, sample_rate))
        .collect();

    samples
        .iter()
        .map(|&x| {
            let mut below = 0.0f32;
            let mut y = 0.0f32;
            for (band, filter) in lowpasses.iter_mut().enumerate() {
                let low = filter.process(x);
                y += gains[band] * (low - below);
                below = low;
            }
            y + gains[BAND_COUNT - 1] * (x - below)
        })
        .collect()
}

struct OnePole {
    coefficient: f32,
    state: f32,
}

impl OnePole {
    fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let coefficient =
            1.0 - (-2.0 * std::f32::consts::PI * cutoff_hz / sample_rate as f32).exp();
        Self { coefficient, state: 0.0 }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.state += self.coefficient * (x - self.state);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_like(count: usize) -> Vec<f32> {
        // Deterministic broadband test signal.
        (0..count)
            .map(|i| ((i as f32 * 12.9898).sin() * 43758.547).fract() - 0.5)
            .collect()
    }

    #[test]
    fn test_unit_gains_are_transparent() {
        let input = noise_like(2048);
        assert_eq!(apply_band_gains(&input, 16000, &[1.0; BAND_COUNT]), input);
    }

    #[test]
    fn test_bands_sum_to_input() {
        // Nudging a gain off 1.0 forces the filter path; the bands must still telescope.
        let input = noise_like(2048);
        let output = apply_band_gains(&input, 16000, &[1.0, 1.0, 1.0, 1.0, 1.0 + 1e-7]);
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_low_band_gain_scales_low_tone() {
        let tone: Vec<f32> = (0..16000)
            .map(|i| (2.0 * std::f32::consts::PI * 60.0 * i as f32 / 16000.0).sin())
            .collect();
        let output = apply_band_gains(&tone, 16000, &[0.5, 1.0, 1.0, 1.0, 1.0]);
        let energy = |s: &[f32]| s.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&output[8000..]) < energy(&tone[8000..]) * 0.6);
    }
}
