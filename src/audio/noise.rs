//! # Background Noise Injection
//!
//! Adds a bed of background noise to converted audio so it sounds like it was
//! recorded somewhere real.
//!
//! ## Noise Sources:
//! - **Ambience beds**: `<ambience_dir>/<type>.wav`, loaded once, RMS-normalized
//!   and looped from a random offset on every call
//! - **White noise**: Gaussian noise with standard deviation `noise_level`, used
//!   for the `white` type and whenever no bed exists for the requested type
//!
//! Every call draws fresh randomness from the thread-local generator. Noise has
//! no continuity across calls.

use crate::audio::{wav, SampleBuffer};
use crate::error::PipelineError;
use parking_lot::Mutex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of background ambience to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseType {
    Cafe,
    Street,
    Room,
    White,
}

impl NoiseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseType::Cafe => "cafe",
            NoiseType::Street => "street",
            NoiseType::Room => "room",
            NoiseType::White => "white",
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cafe" => Ok(NoiseType::Cafe),
            "street" => Ok(NoiseType::Street),
            "room" => Ok(NoiseType::Room),
            "white" => Ok(NoiseType::White),
            other => Err(PipelineError::Config(format!("Unknown noise type: {}", other))),
        }
    }
}

/// Normalized ambience beds keyed by type and sample rate.
/// `None` records that no bed exists so the filesystem is only checked once.
type BedCache = HashMap<(NoiseType, u32), Option<Arc<Vec<f32>>>>;

/// Adds background noise to sample buffers.
pub struct NoiseInjector {
    ambience_dir: Option<PathBuf>,
    beds: Mutex<BedCache>,
}

impl NoiseInjector {
    /// Create an injector; `ambience_dir` may be `None` to use white noise only.
    pub fn new(ambience_dir: Option<PathBuf>) -> Self {
        Self {
            ambience_dir,
            beds: Mutex::new(HashMap::new()),
        }
    }

    /// Add `noise_type` noise at `noise_level` to `samples`.
    ///
    /// A level of zero or below (or NaN) returns the input unchanged.
    pub fn add_background_noise(
        &self,
        samples: &[f32],
        noise_type: NoiseType,
        noise_level: f32,
        sample_rate: u32,
    ) -> Vec<f32> {
        if noise_level.is_nan() || noise_level <= 0.0 || samples.is_empty() {
            return samples.to_vec();
        }

        if noise_type != NoiseType::White {
            if let Some(bed) = self.ambience_bed(noise_type, sample_rate) {
                return mix_bed(samples, &bed, noise_level);
            }
        }

        add_white_noise(samples, noise_level)
    }

    fn ambience_bed(&self, noise_type: NoiseType, sample_rate: u32) -> Option<Arc<Vec<f32>>> {
        let dir = self.ambience_dir.as_ref()?;
        let key = (noise_type, sample_rate);

        if let Some(cached) = self.beds.lock().get(&key) {
            return cached.clone();
        }

        let path = dir.join(format!("{}.wav", noise_type));
        let loaded = if path.exists() {
            match wav::read_file(&path) {
                Ok(buffer) => normalize_bed(buffer, sample_rate).map(Arc::new),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load ambience bed, using white noise");
                    None
                }
            }
        } else {
            debug!(path = %path.display(), "No ambience bed found, using white noise");
            None
        };

        self.beds.lock().insert(key, loaded.clone());
        loaded
    }
}

impl Default for NoiseInjector {
    fn default() -> Self {
        Self::new(None)
    }
}

fn normalize_bed(buffer: SampleBuffer, sample_rate: u32) -> Option<Vec<f32>> {
    let bed = buffer.resampled(sample_rate).samples;
    if bed.is_empty() {
        return None;
    }
    let rms = (bed.iter().map(|s| s * s).sum::<f32>() / bed.len() as f32).sqrt();
    if rms <= f32::EPSILON {
        return None;
    }
    Some(bed.into_iter().map(|s| s / rms).collect())
}

fn mix_bed(samples: &[f32], bed: &[f32], noise_level: f32) -> Vec<f32> {
    let offset = rand::rng().random_range(0..bed.len());
    samples
        .iter()
        .enumerate()
        .map(|(i, &s)| s + noise_level * bed[(offset + i) % bed.len()])
        .collect()
}

fn add_white_noise(samples: &[f32], noise_level: f32) -> Vec<f32> {
    let normal = match Normal::new(0.0f32, noise_level) {
        Ok(normal) => normal,
        Err(e) => {
            warn!(noise_level, error = %e, "Invalid noise level, skipping noise");
            return samples.to_vec();
        }
    };
    let mut rng = rand::rng();
    samples.iter().map(|&s| s + normal.sample(&mut rng)).collect()
}
