//! # Voice Pipeline
//!
//! Runs one request through the conversion stages:
//!
//! ```text
//! samples → ConversionEngine → FluctuationGenerator → [ChunkStitcher] → NoiseInjector
//! ```
//!
//! The stitcher stage only runs on the chunk path. Every stage keeps the
//! sample rate of the input buffer.
//!
//! ## Key Features:
//! - **Blocking pool**: engine construction and conversion run under
//!   `tokio::task::spawn_blocking`, so model loads never stall the HTTP workers
//! - **Deadline**: conversion is bounded by `tokio::time::timeout`; an expired
//!   deadline falls back to the demo pitch shift and marks the outcome degraded
//! - **Failure policy**: a conversion failure either reaches the caller or is
//!   replaced by the unconverted input, depending on `fail_on_conversion_error`
//! - **Session lock**: fluctuation and stitching for one session run under a
//!   single lock, so concurrent calls on a session are applied one after another

use crate::audio::{pitch, wav, NoiseInjector, NoiseType, SampleBuffer};
use crate::config::AppConfig;
use crate::conversion::EngineRegistry;
use crate::error::{PipelineError, PipelineResult};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Behavior knobs for the pipeline itself.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub conversion_timeout: Duration,
    pub fail_on_conversion_error: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            conversion_timeout: Duration::from_secs(10),
            fail_on_conversion_error: true,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            conversion_timeout: config.conversion_timeout(),
            fail_on_conversion_error: config.performance.fail_on_conversion_error,
        }
    }
}

/// Parameters for a whole-buffer conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub model: String,
    pub pitch_shift: i32,
    pub noise_type: NoiseType,
    pub noise_level: f32,
    pub enable_fluctuation: bool,
    pub session_id: String,
}

impl Default for ConvertRequest {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            pitch_shift: 0,
            noise_type: NoiseType::Cafe,
            noise_level: 0.02,
            enable_fluctuation: true,
            session_id: "default".to_string(),
        }
    }
}

/// Parameters for one streaming chunk. Noise is off unless asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub model: String,
    pub pitch_shift: i32,
    pub noise_type: NoiseType,
    pub noise_level: f32,
    pub enable_fluctuation: bool,
    pub session_id: String,
}

impl Default for ChunkRequest {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            pitch_shift: 0,
            noise_type: NoiseType::Cafe,
            noise_level: 0.0,
            enable_fluctuation: true,
            session_id: "default".to_string(),
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct ConvertOutcome {
    pub buffer: SampleBuffer,
    pub processing_time: Duration,
    /// Set when the conversion stage timed out or was skipped after a failure
    pub degraded: bool,
}

impl ConvertOutcome {
    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time.as_secs_f64() * 1000.0
    }

    pub fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }
}

/// Stage parameters shared by both request kinds.
#[derive(Debug, Clone)]
struct Stages {
    model: String,
    pitch_shift: i32,
    noise_type: NoiseType,
    noise_level: f32,
    enable_fluctuation: bool,
    session_id: String,
    stitch: bool,
}

impl From<&ConvertRequest> for Stages {
    fn from(req: &ConvertRequest) -> Self {
        Self {
            model: req.model.clone(),
            pitch_shift: req.pitch_shift,
            noise_type: req.noise_type,
            noise_level: req.noise_level,
            enable_fluctuation: req.enable_fluctuation,
            session_id: req.session_id.clone(),
            stitch: false,
        }
    }
}

impl From<&ChunkRequest> for Stages {
    fn from(req: &ChunkRequest) -> Self {
        Self {
            model: req.model.clone(),
            pitch_shift: req.pitch_shift,
            noise_type: req.noise_type,
            noise_level: req.noise_level,
            enable_fluctuation: req.enable_fluctuation,
            session_id: req.session_id.clone(),
            stitch: true,
        }
    }
}

/// The conversion pipeline. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct VoicePipeline {
    registry: Arc<EngineRegistry>,
    noise: Arc<NoiseInjector>,
    settings: PipelineSettings,
}

impl VoicePipeline {
    pub fn new(registry: Arc<EngineRegistry>, noise: Arc<NoiseInjector>, settings: PipelineSettings) -> Self {
        Self { registry, noise, settings }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Convert a whole recording.
    pub async fn convert(&self, buffer: SampleBuffer, request: &ConvertRequest) -> PipelineResult<ConvertOutcome> {
        self.run(buffer, Stages::from(request)).await
    }

    /// Convert one chunk of a stream, blending it with the session's previous chunk.
    pub async fn convert_chunk(&self, buffer: SampleBuffer, request: &ChunkRequest) -> PipelineResult<ConvertOutcome> {
        self.run(buffer, Stages::from(request)).await
    }

    /// Run the whole-recording chain on a WAV file and write the result.
    ///
    /// ## Steps:
    /// 1. Read and downmix `input`, resampling to `target_sample_rate` unless it is 0
    /// 2. Convert, fluctuate and add noise exactly as [`VoicePipeline::convert`]
    /// 3. Create the parent directory of `output` and write 16-bit WAV
    pub async fn process_file(
        &self,
        input: &Path,
        output: &Path,
        target_sample_rate: u32,
        request: &ConvertRequest,
    ) -> PipelineResult<ConvertOutcome> {
        let path = input.to_path_buf();
        let buffer = tokio::task::spawn_blocking(move || wav::read_file(&path))
            .await
            .map_err(|e| PipelineError::Codec(format!("file read task failed: {}", e)))??
            .resampled(target_sample_rate);
        info!(
            input = %input.display(),
            sample_rate = buffer.sample_rate,
            duration_seconds = buffer.duration_seconds(),
            "Processing file"
        );

        let outcome = self.convert(buffer, request).await?;

        let path = output.to_path_buf();
        let result = outcome.buffer.clone();
        tokio::task::spawn_blocking(move || -> PipelineResult<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            wav::write_file(&path, &result)
        })
        .await
        .map_err(|e| PipelineError::Codec(format!("file write task failed: {}", e)))??;

        info!(output = %output.display(), degraded = outcome.degraded, "File processing complete");
        Ok(outcome)
    }

    /// Reset a session's fluctuation and stitching state. `false` when unknown.
    pub fn reset_session(&self, session_id: &str) -> bool {
        self.registry.reset_session(session_id)
    }

    async fn run(&self, buffer: SampleBuffer, stages: Stages) -> PipelineResult<ConvertOutcome> {
        let start = Instant::now();
        let sample_rate = buffer.sample_rate;
        let input = Arc::new(buffer.samples);

        let (converted, degraded) = match self.convert_with_deadline(&input, sample_rate, &stages).await {
            Ok(samples) => (samples, false),
            Err(PipelineError::Timeout(limit)) => {
                warn!(
                    model = %stages.model,
                    timeout_ms = limit.as_millis() as u64,
                    "Conversion timed out, using demo conversion"
                );
                (self.demo_fallback(&input, sample_rate, stages.pitch_shift).await?, true)
            }
            Err(PipelineError::ConversionFailure(msg)) if !self.settings.fail_on_conversion_error => {
                warn!(model = %stages.model, error = %msg, "Conversion failed, passing audio through");
                (input.as_ref().clone(), true)
            }
            Err(e) => return Err(e),
        };

        let this = self.clone();
        let samples = tokio::task::spawn_blocking(move || this.post_process(converted, sample_rate, &stages))
            .await
            .map_err(|e| PipelineError::ConversionFailure(format!("post-processing task failed: {}", e)))??;

        let outcome = ConvertOutcome {
            buffer: SampleBuffer::new(samples, sample_rate),
            processing_time: start.elapsed(),
            degraded,
        };
        debug!(
            processing_ms = outcome.processing_time_ms(),
            duration_seconds = outcome.duration_seconds(),
            degraded,
            "Pipeline run complete"
        );
        Ok(outcome)
    }

    /// Look up the engine and convert on the blocking pool, bounded by the deadline.
    async fn convert_with_deadline(
        &self,
        input: &Arc<Vec<f32>>,
        sample_rate: u32,
        stages: &Stages,
    ) -> PipelineResult<Vec<f32>> {
        let registry = Arc::clone(&self.registry);
        let samples = Arc::clone(input);
        let model = stages.model.clone();
        let pitch_shift = stages.pitch_shift;

        let task = tokio::task::spawn_blocking(move || {
            let engine = registry.get_or_create_conversion_engine(&model, pitch_shift)?;
            engine.convert(&samples, sample_rate)
        });

        match tokio::time::timeout(self.settings.conversion_timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| PipelineError::ConversionFailure(format!("conversion task failed: {}", e)))?,
            Err(_) => Err(PipelineError::Timeout(self.settings.conversion_timeout)),
        }
    }

    async fn demo_fallback(&self, input: &Arc<Vec<f32>>, sample_rate: u32, pitch_shift: i32) -> PipelineResult<Vec<f32>> {
        let samples = Arc::clone(input);
        tokio::task::spawn_blocking(move || pitch::shift_pitch(&samples, sample_rate, pitch_shift as f32))
            .await
            .map_err(|e| PipelineError::ConversionFailure(format!("demo conversion task failed: {}", e)))?
    }

    /// Fluctuation, stitching and noise, in that order.
    fn post_process(&self, samples: Vec<f32>, sample_rate: u32, stages: &Stages) -> PipelineResult<Vec<f32>> {
        let mut samples = samples;

        if stages.enable_fluctuation || stages.stitch {
            let session = self.registry.get_or_create_session(&stages.session_id)?;
            let mut session = session.lock();
            if stages.enable_fluctuation {
                samples = session.generator.apply(&samples, sample_rate);
            }
            if stages.stitch {
                samples = session.stitcher.process_chunk(&samples, sample_rate);
            }
        }

        Ok(self
            .noise
            .add_background_noise(&samples, stages.noise_type, stages.noise_level, sample_rate))
    }
}
