//! Linear-interpolation resampling.

/// Resample `samples` from `from_rate` to `to_rate` by linear interpolation.
///
/// The output holds `len * to_rate / from_rate` samples. Positions past the
/// last input sample repeat the final value.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            if source_idx >= last {
                return samples[last];
            }
            let fraction = (source_pos - source_idx as f64) as f32;
            let left = samples[source_idx];
            let right = samples[source_idx + 1];
            left + (right - left) * fraction
        })
        .collect()
}

/// Read `samples` at a fractional position, returning 0 outside the buffer.
pub(crate) fn interpolate_at(samples: &[f32], position: f64) -> f32 {
    if position < 0.0 || samples.is_empty() {
        return 0.0;
    }
    let index = position.floor() as usize;
    if index >= samples.len() {
        return 0.0;
    }
    let fraction = (position - index as f64) as f32;
    let left = samples[index];
    let right = samples.get(index + 1).copied().unwrap_or(0.0);
    left + (right - left) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let input = vec![0.0; 48000];
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 16000);
        assert_eq!(resample_linear(&input[..16000], 16000, 44100).len(), 44100);
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let output = resample_linear(&[0.0, 1.0, 0.0], 1000, 2000);
        assert_eq!(output.len(), 6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
        assert!((output[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interpolate_at_bounds() {
        let samples = [1.0, 3.0];
        assert_eq!(interpolate_at(&samples, -0.5), 0.0);
        assert!((interpolate_at(&samples, 0.5) - 2.0).abs() < 1e-6);
        assert_eq!(interpolate_at(&samples, 2.0), 0.0);
    }
}
