//! # Model Inference Backend
//!
//! The narrow contract between a [`ConversionEngine`](super::ConversionEngine)
//! and whatever actually runs a voice model.
//!
//! ## Contract:
//! - **load**: read a checkpoint onto a device, or report `NotFound` / `LoadFailed`
//! - **extract_pitch_contour**: F0 track in Hz, one value per 512-sample hop,
//!   0.0 for unvoiced frames
//! - **infer**: synthesize the converted waveform, or report `Unsupported`
//!
//! [`CandleBackend`] is the shipped implementation. It loads PyTorch weights
//! through candle and tracks pitch by normalized autocorrelation, but has no
//! synthesis graph, so `infer` always reports `Unsupported` and engines fall
//! back to demo conversion.

use crate::conversion::ConversionConfig;
use crate::device::DeviceManager;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Analysis hop between pitch frames, in samples.
pub const PITCH_HOP: usize = 512;

/// Autocorrelation window, in samples.
const PITCH_FRAME: usize = 2048;

/// Search range C2..C7.
const MIN_F0_HZ: f32 = 65.41;
const MAX_F0_HZ: f32 = 2093.0;

/// Frames whose best normalized correlation falls below this are unvoiced.
const VOICING_THRESHOLD: f32 = 0.5;

/// Pitch extraction algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum F0Method {
    Pm,
    Harvest,
    Crepe,
    Rmvpe,
}

impl fmt::Display for F0Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            F0Method::Pm => "pm",
            F0Method::Harvest => "harvest",
            F0Method::Crepe => "crepe",
            F0Method::Rmvpe => "rmvpe",
        };
        f.write_str(name)
    }
}

impl FromStr for F0Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pm" => Ok(F0Method::Pm),
            "harvest" => Ok(F0Method::Harvest),
            "crepe" => Ok(F0Method::Crepe),
            "rmvpe" => Ok(F0Method::Rmvpe),
            _ => Err(format!("Unknown F0 method: {}", s)),
        }
    }
}

/// Failures reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No checkpoint at the given path
    NotFound(PathBuf),
    /// The checkpoint exists but could not be read
    LoadFailed(String),
    /// The backend cannot perform this operation at all
    Unsupported(String),
    /// Inference ran and failed
    Inference(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotFound(path) => write!(f, "model file not found: {}", path.display()),
            BackendError::LoadFailed(msg) => write!(f, "failed to load model: {}", msg),
            BackendError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            BackendError::Inference(msg) => write!(f, "inference failed: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// A checkpoint loaded onto a compute device.
#[derive(Debug)]
pub struct ModelHandle {
    pub path: PathBuf,
    pub device: String,
    pub tensors: Vec<(String, Tensor)>,
}

impl ModelHandle {
    /// Total number of weights across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.tensors.iter().map(|(_, t)| t.elem_count()).sum()
    }
}

/// Everything a conversion engine needs from a model runtime.
///
/// ## Thread Safety:
/// Backends are shared by every engine behind an `Arc`, so they must be `Send + Sync`.
pub trait InferenceBackend: Send + Sync {
    fn load(&self, path: &Path, device: &Device) -> Result<ModelHandle, BackendError>;

    fn extract_pitch_contour(&self, samples: &[f32], sample_rate: u32, method: F0Method) -> Vec<f32>;

    fn infer(
        &self,
        model: &ModelHandle,
        samples: &[f32],
        sample_rate: u32,
        contour: &[f32],
        config: &ConversionConfig,
    ) -> Result<Vec<f32>, BackendError>;
}

/// Candle-based backend: real weight loading and pitch tracking, no synthesis.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleBackend;

impl InferenceBackend for CandleBackend {
    fn load(&self, path: &Path, device: &Device) -> Result<ModelHandle, BackendError> {
        if !path.exists() {
            return Err(BackendError::NotFound(path.to_path_buf()));
        }

        info!(path = %path.display(), "Loading voice model weights");
        let tensors = candle_core::pickle::read_all(path)
            .map_err(|e| BackendError::LoadFailed(e.to_string()))?;
        if tensors.is_empty() {
            return Err(BackendError::LoadFailed(format!(
                "{} contains no tensors",
                path.display()
            )));
        }

        let tensors = tensors
            .into_iter()
            .map(|(name, tensor)| {
                tensor
                    .to_device(device)
                    .map(|t| (name, t))
                    .map_err(|e| BackendError::LoadFailed(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handle = ModelHandle {
            path: path.to_path_buf(),
            device: DeviceManager::get_device_info(device),
            tensors,
        };
        info!(
            path = %path.display(),
            tensors = handle.tensors.len(),
            parameters = handle.parameter_count(),
            device = %handle.device,
            "Voice model loaded"
        );
        Ok(handle)
    }

    fn extract_pitch_contour(&self, samples: &[f32], sample_rate: u32, method: F0Method) -> Vec<f32> {
        match method {
            F0Method::Harvest | F0Method::Pm => autocorrelation_f0(samples, sample_rate),
            F0Method::Crepe | F0Method::Rmvpe => {
                warn!(method = %method, "F0 method not available, returning an unvoiced contour");
                vec![0.0; samples.len() / PITCH_HOP]
            }
        }
    }

    fn infer(
        &self,
        model: &ModelHandle,
        _samples: &[f32],
        _sample_rate: u32,
        contour: &[f32],
        _config: &ConversionConfig,
    ) -> Result<Vec<f32>, BackendError> {
        debug!(
            path = %model.path.display(),
            frames = contour.len(),
            "No synthesis graph for this checkpoint"
        );
        Err(BackendError::Unsupported(
            "waveform synthesis is not available in the candle backend".to_string(),
        ))
    }
}

/// Frame-wise F0 by normalized autocorrelation, one value per [`PITCH_HOP`].
pub fn autocorrelation_f0(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let frames = samples.len() / PITCH_HOP;
    if sample_rate == 0 || frames == 0 {
        return vec![0.0; frames];
    }

    let min_lag = ((sample_rate as f32 / MAX_F0_HZ).floor() as usize).max(2);
    let max_lag = (sample_rate as f32 / MIN_F0_HZ).ceil() as usize;

    (0..frames)
        .map(|frame| {
            let start = frame * PITCH_HOP;
            let end = (start + PITCH_FRAME.max(2 * max_lag)).min(samples.len());
            frame_f0(&samples[start..end], sample_rate, min_lag, max_lag)
        })
        .collect()
}

fn frame_f0(frame: &[f32], sample_rate: u32, min_lag: usize, max_lag: usize) -> f32 {
    let max_lag = max_lag.min(frame.len().saturating_sub(2));
    if max_lag <= min_lag + 1 {
        return 0.0;
    }
    let energy: f32 = frame.iter().map(|x| x * x).sum();
    if energy < 1e-6 * frame.len() as f32 {
        return 0.0;
    }

    let correlations: Vec<f32> = (0..=max_lag)
        .map(|lag| {
            if lag < min_lag {
                return 0.0;
            }
            let head = &frame[..frame.len() - lag];
            let tail = &frame[lag..];
            let cross: f32 = head.iter().zip(tail).map(|(a, b)| a * b).sum();
            let norm = (head.iter().map(|x| x * x).sum::<f32>() * tail.iter().map(|x| x * x).sum::<f32>()).sqrt();
            if norm > 0.0 { cross / norm } else { 0.0 }
        })
        .collect();

    let best = correlations[min_lag..=max_lag]
        .iter()
        .copied()
        .fold(f32::MIN, f32::max);
    if best < VOICING_THRESHOLD {
        return 0.0;
    }

    // Earliest strong peak avoids picking a multiple of the true period.
    let lag = (min_lag + 1..max_lag)
        .find(|&lag| {
            let r = correlations[lag];
            r >= 0.9 * best && r >= correlations[lag - 1] && r >= correlations[lag + 1]
        })
        .unwrap_or(min_lag);

    // Parabolic refinement around the chosen lag.
    let (left, centre, right) = (correlations[lag - 1], correlations[lag], correlations[lag + 1]);
    let denominator = left - 2.0 * centre + right;
    let offset = if denominator.abs() > f32::EPSILON {
        (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    sample_rate as f32 / (lag as f32 + offset)
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

    #[test]
    fn test_tracks_sine_frequency() {
        let contour = autocorrelation_f0(&sine(220.0, 16000, 0.5), 16000);
        assert_eq!(contour.len(), 8000 / PITCH_HOP);

        let voiced: Vec<f32> = contour.iter().copied().filter(|&f| f > 0.0).collect();
        assert!(!voiced.is_empty());
        for f0 in voiced {
            assert!((f0 - 220.0).abs() < 220.0 * 0.03, "estimated {}", f0);
        }
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let contour = autocorrelation_f0(&vec![0.0; 4096], 16000);
        assert_eq!(contour, vec![0.0; 8]);
    }

    #[test]
    fn test_unavailable_methods_return_zero_contour() {
        let backend = CandleBackend;
        let samples = sine(220.0, 16000, 0.25);
        let contour = backend.extract_pitch_contour(&samples, 16000, F0Method::Crepe);
        assert_eq!(contour, vec![0.0; samples.len() / PITCH_HOP]);
    }

    #[test]
    fn test_missing_checkpoint_is_not_found() {
        let backend = CandleBackend;
        let path = std::env::temp_dir().join(format!("makebeliv-missing-{}/model.pth", uuid::Uuid::new_v4()));
        assert!(matches!(
            backend.load(&path, &Device::Cpu),
            Err(BackendError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_checkpoint_fails_to_load() {
        let path = std::env::temp_dir().join(format!("makebeliv-corrupt-{}.pth", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"definitely not a checkpoint").unwrap();
        let result = CandleBackend.load(&path, &Device::Cpu);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(BackendError::LoadFailed(_))));
    }

    #[test]
    fn test_f0_method_parsing() {
        assert_eq!("harvest".parse::<F0Method>().unwrap(), F0Method::Harvest);
        assert_eq!("RMVPE".parse::<F0Method>().unwrap(), F0Method::Rmvpe);
        assert!("yin".parse::<F0Method>().is_err());
    }
}
