//! # Conversion Engine
//!
//! One engine wraps one (model, pitch shift) configuration. It tries to load
//! its model once at construction; if that fails it keeps working in
//! **demo mode**, where conversion is a plain pitch shift (and the identity
//! when the shift is 0).
//!
//! ## Conversion Flow (model loaded):
//! 1. Extract the F0 contour with the configured method
//! 2. Median-filter it when `filter_radius >= 3`
//! 3. Scale voiced frames by `2^(semitones / 12)`
//! 4. Hand samples and contour to the backend's `infer`
//! 5. If the backend cannot synthesize, fall back to the demo pitch shift
//!
//! ## Thread Safety:
//! `convert` takes `&self` and mutates nothing, so one engine can serve any
//! number of concurrent requests.

use crate::audio::pitch::{self, semitones_to_ratio};
use crate::audio::buffer::validate_samples;
use crate::audio::{wav, SampleBuffer};
use crate::conversion::backend::{BackendError, F0Method, InferenceBackend, ModelHandle};
use crate::device::{DeviceManager, DevicePreference};
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for a single conversion engine.
///
/// ## Fields:
/// - `index_rate`, `rms_mix_rate`, `protect`: ratios in [0, 1], passed to the backend
/// - `filter_radius`: median filtering of the F0 contour kicks in at 3 and above
/// - `resample_rate`: output rate for `convert_file`; 0 keeps the working rate
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    pub model_path: PathBuf,
    pub device: DevicePreference,
    pub pitch_shift_semitones: i32,
    pub f0_method: F0Method,
    pub index_rate: f32,
    pub filter_radius: u32,
    pub resample_rate: u32,
    pub rms_mix_rate: f32,
    pub protect: f32,
}

impl ConversionConfig {
    /// Configuration with stock RVC defaults for `model_path` and `pitch_shift_semitones`.
    pub fn new(model_path: impl Into<PathBuf>, pitch_shift_semitones: i32) -> Self {
        ConversionDefaults::default().for_model(model_path, pitch_shift_semitones, DevicePreference::Auto)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(PipelineError::Config("model_path must not be empty".to_string()));
        }
        validate_ratios(self.index_rate, self.rms_mix_rate, self.protect)
    }
}

/// Model-independent conversion parameters shared by every engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionDefaults {
    pub f0_method: F0Method,
    pub index_rate: f32,
    pub filter_radius: u32,
    pub resample_rate: u32,
    pub rms_mix_rate: f32,
    pub protect: f32,
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            f0_method: F0Method::Harvest,
            index_rate: 0.75,
            filter_radius: 3,
            resample_rate: 0,
            rms_mix_rate: 0.25,
            protect: 0.33,
        }
    }
}

impl ConversionDefaults {
    /// Complete these defaults into a configuration for one engine.
    pub fn for_model(
        &self,
        model_path: impl Into<PathBuf>,
        pitch_shift_semitones: i32,
        device: DevicePreference,
    ) -> ConversionConfig {
        ConversionConfig {
            model_path: model_path.into(),
            device,
            pitch_shift_semitones,
            f0_method: self.f0_method,
            index_rate: self.index_rate,
            filter_radius: self.filter_radius,
            resample_rate: self.resample_rate,
            rms_mix_rate: self.rms_mix_rate,
            protect: self.protect,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        validate_ratios(self.index_rate, self.rms_mix_rate, self.protect)
    }
}

fn validate_ratios(index_rate: f32, rms_mix_rate: f32, protect: f32) -> PipelineResult<()> {
    for (name, value) in [
        ("index_rate", index_rate),
        ("rms_mix_rate", rms_mix_rate),
        ("protect", protect),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(PipelineError::Config(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    Ok(())
}

/// Converts audio for one (model, pitch shift) pair.
pub struct ConversionEngine {
    config: ConversionConfig,
    backend: Arc<dyn InferenceBackend>,
    model: Option<ModelHandle>,
}

impl ConversionEngine {
    /// Validate `config` and try to load the model.
    ///
    /// ## Errors:
    /// Only invalid configuration fails construction. A missing or unreadable
    /// model is logged and leaves the engine in demo mode.
    pub fn new(config: ConversionConfig, backend: Arc<dyn InferenceBackend>) -> PipelineResult<Self> {
        config.validate()?;

        let device = DeviceManager::get_device(config.device);
        let model = match backend.load(&config.model_path, &device) {
            Ok(handle) => Some(handle),
            Err(e) => {
                let unavailable = PipelineError::ModelUnavailable(e.to_string());
                warn!(
                    model_path = %config.model_path.display(),
                    error = %unavailable,
                    "Running conversion engine in demo mode"
                );
                None
            }
        };

        info!(
            model_path = %config.model_path.display(),
            pitch_shift = config.pitch_shift_semitones,
            demo_mode = model.is_none(),
            "Conversion engine ready"
        );

        Ok(Self { config, backend, model })
    }

    pub fn is_demo_mode(&self) -> bool {
        self.model.is_none()
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert `samples`, keeping their length and sample rate.
    ///
    /// ## Returns:
    /// - **Ok(samples)**: converted audio
    /// - **Err(ConversionFailure)**: malformed buffer or backend inference failure
    pub fn convert(&self, samples: &[f32], sample_rate: u32) -> PipelineResult<Vec<f32>> {
        let Some(model) = &self.model else {
            return self.demo_convert(samples, sample_rate);
        };

        validate_samples(samples, sample_rate)?;
        let contour = self.pitch_contour(samples, sample_rate);

        match self
            .backend
            .infer(model, samples, sample_rate, &contour, &self.config)
        {
            Ok(converted) => Ok(converted),
            Err(BackendError::Unsupported(reason)) => {
                debug!(reason = %reason, "Backend cannot synthesize, using demo conversion");
                self.demo_convert(samples, sample_rate)
            }
            Err(e) => Err(PipelineError::ConversionFailure(e.to_string())),
        }
    }

    /// Pitch-shift-only conversion. The identity when the shift is 0.
    pub fn demo_convert(&self, samples: &[f32], sample_rate: u32) -> PipelineResult<Vec<f32>> {
        pitch::shift_pitch(samples, sample_rate, self.config.pitch_shift_semitones as f32)
    }

    /// F0 contour after filtering and the configured transposition.
    pub fn pitch_contour(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let raw = self
            .backend
            .extract_pitch_contour(samples, sample_rate, self.config.f0_method);
        let mut contour = if self.config.filter_radius >= 3 {
            median3(&raw)
        } else {
            raw
        };

        let ratio = semitones_to_ratio(self.config.pitch_shift_semitones as f32) as f32;
        for f0 in contour.iter_mut() {
            *f0 *= ratio;
        }
        contour
    }

    /// Convert a WAV file on disk.
    ///
    /// ## Steps:
    /// 1. Read and downmix `input`
    /// 2. Resample to `target_sample_rate` when it differs
    /// 3. Convert, then resample to `resample_rate` when that is non-zero
    /// 4. Create the parent directory of `output` and write 16-bit WAV
    pub fn convert_file(&self, input: &Path, output: &Path, target_sample_rate: u32) -> PipelineResult<PathBuf> {
        let buffer = wav::read_file(input)?.resampled(target_sample_rate);
        info!(
            input = %input.display(),
            sample_rate = buffer.sample_rate,
            duration_seconds = buffer.duration_seconds(),
            "Converting file"
        );

        let converted = self.convert(&buffer.samples, buffer.sample_rate)?;
        let result = SampleBuffer::new(converted, buffer.sample_rate).resampled(self.config.resample_rate);

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        wav::write_file(output, &result)?;

        info!(output = %output.display(), "File conversion complete");
        Ok(output.to_path_buf())
    }
}

/// Three-tap median filter; the ends keep their own values.
fn median3(values: &[f32]) -> Vec<f32> {
    if values.len() < 3 {
        return values.to_vec();
    }
    let mut filtered = values.to_vec();
    for i in 1..values.len() - 1 {
        let mut window = [values[i - 1], values[i], values[i + 1]];
        window.sort_by(|a, b| a.total_cmp(b));
        filtered[i] = window[1];
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose model always loads and whose inference echoes the contour length.
    struct ScriptedBackend {
        loads: AtomicUsize,
        infer_result: Result<(), BackendError>,
    }

    impl ScriptedBackend {
        fn new(infer_result: Result<(), BackendError>) -> Self {
            Self { loads: AtomicUsize::new(0), infer_result }
        }
    }

    impl InferenceBackend for ScriptedBackend {
        fn load(&self, path: &Path, _device: &Device) -> Result<ModelHandle, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(ModelHandle { path: path.to_path_buf(), device: "CPU".to_string(), tensors: Vec::new() })
        }

        fn extract_pitch_contour(&self, samples: &[f32], _sample_rate: u32, _method: F0Method) -> Vec<f32> {
            if samples.is_empty() {
                return Vec::new();
            }
            vec![100.0, 100.0, 400.0, 100.0, 0.0]
        }

        fn infer(
            &self,
            _model: &ModelHandle,
            samples: &[f32],
            _sample_rate: u32,
            _contour: &[f32],
            _config: &ConversionConfig,
        ) -> Result<Vec<f32>, BackendError> {
            match &self.infer_result {
                Ok(()) => Ok(samples.iter().map(|s| -s).collect()),
                Err(e) => Err(e.clone()),
            }
        }
    }

    fn missing_model_config(pitch_shift: i32) -> ConversionConfig {
        let mut config = ConversionConfig::new(
            std::env::temp_dir().join(format!("makebeliv-none-{}/model.pth", uuid::Uuid::new_v4())),
            pitch_shift,
        );
        config.device = DevicePreference::Cpu;
        config
    }

    fn sine(seconds: f32) -> Vec<f32> {
        (0..(16000.0 * seconds) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_missing_model_enters_demo_mode() {
        let engine = ConversionEngine::new(missing_model_config(0), Arc::new(crate::conversion::CandleBackend)).unwrap();
        assert!(engine.is_demo_mode());
    }

    #[test]
    fn test_demo_mode_zero_shift_is_identity() {
        let engine = ConversionEngine::new(missing_model_config(0), Arc::new(crate::conversion::CandleBackend)).unwrap();
        let input = sine(1.0);
        assert_eq!(engine.convert(&input, 16000).unwrap(), input);
        // Identity holds for any buffer and rate.
        assert_eq!(engine.convert(&[f32::NAN, 2.0], 0).unwrap().len(), 2);
    }

    #[test]
    fn test_demo_mode_shift_keeps_length() {
        let engine = ConversionEngine::new(missing_model_config(4), Arc::new(crate::conversion::CandleBackend)).unwrap();
        let input = sine(0.5);
        let output = engine.convert(&input, 16000).unwrap();
        assert_eq!(output.len(), input.len());
        assert_ne!(output, input);
    }

    #[test]
    fn test_malformed_buffer_is_conversion_failure() {
        let engine = ConversionEngine::new(missing_model_config(2), Arc::new(crate::conversion::CandleBackend)).unwrap();
        let err = engine.convert(&[0.1, f32::NAN], 16000).unwrap_err();
        assert!(matches!(err, PipelineError::ConversionFailure(_)));
    }

    #[test]
    fn test_unsupported_inference_falls_back_to_demo() {
        let backend = Arc::new(ScriptedBackend::new(Err(BackendError::Unsupported("no graph".into()))));
        let engine = ConversionEngine::new(ConversionConfig::new("models/test/model.pth", 0), backend.clone()).unwrap();
        assert!(!engine.is_demo_mode());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);

        let input = sine(0.1);
        assert_eq!(engine.convert(&input, 16000).unwrap(), input);
    }

    #[test]
    fn test_inferred_waveform_replaces_demo_output() {
        let backend = Arc::new(ScriptedBackend::new(Ok(())));
        let engine = ConversionEngine::new(ConversionConfig::new("models/test/model.pth", 0), backend).unwrap();
        let output = engine.convert(&[0.25, -0.5], 16000).unwrap();
        assert_eq!(output, vec![-0.25, 0.5]);
    }

    #[test]
    fn test_inference_error_propagates() {
        let backend = Arc::new(ScriptedBackend::new(Err(BackendError::Inference("oom".into()))));
        let engine = ConversionEngine::new(ConversionConfig::new("models/test/model.pth", 0), backend).unwrap();
        assert!(matches!(
            engine.convert(&[0.1; 16], 16000),
            Err(PipelineError::ConversionFailure(_))
        ));
    }

    #[test]
    fn test_pitch_contour_is_filtered_and_scaled() {
        let backend = Arc::new(ScriptedBackend::new(Ok(())));
        let engine = ConversionEngine::new(ConversionConfig::new("models/test/model.pth", 12), backend).unwrap();
        let contour = engine.pitch_contour(&[0.0; 8], 16000);
        // The 400 Hz spike is removed by the median filter, then everything doubles.
        assert_eq!(contour, vec![200.0, 200.0, 200.0, 200.0, 0.0]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ConversionConfig::new("models/x/model.pth", 0);
        config.index_rate = 1.5;
        assert!(matches!(
            ConversionEngine::new(config, Arc::new(crate::conversion::CandleBackend)),
            Err(PipelineError::Config(_))
        ));
        assert!(ConversionConfig::new("", 0).validate().is_err());
    }

    #[test]
    fn test_convert_file_resamples_and_writes() {
        let dir = std::env::temp_dir().join(format!("makebeliv-files-{}", uuid::Uuid::new_v4()));
        let input_path = dir.join("input.wav");
        let output_path = dir.join("nested/output.wav");
        std::fs::create_dir_all(&dir).unwrap();
        let input = SampleBuffer::new((0..44100).map(|i| (i as f32 * 0.01).sin() * 0.3).collect(), 44100);
        wav::write_file(&input_path, &input).unwrap();

        let mut config = missing_model_config(0);
        config.resample_rate = 8000;
        let engine = ConversionEngine::new(config, Arc::new(crate::conversion::CandleBackend)).unwrap();
        let written = engine.convert_file(&input_path, &output_path, 16000).unwrap();

        let output = wav::read_file(&written).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(written, output_path);
        assert_eq!(output.sample_rate, 8000);
        assert_eq!(output.len(), 8000);
    }
}
