//! # Chunk Stitching
//!
//! Streaming sessions convert each chunk independently, so consecutive
//! chunks rarely line up at their boundary. The stitcher keeps the tail of
//! what it last emitted and bends the head of the next chunk so it starts
//! where the previous one left off.
//!
//! ## Behavior:
//! - **First chunk** (or first after `reset`): returned untouched
//! - **Later chunks**: the gap between the tail's extrapolated next sample and
//!   the new chunk's first sample is added to the head and faded out over
//!   `min(overlap, tail, chunk)` samples
//! - **Length**: output always has exactly as many samples as the input
//! - **Sample-rate change**: the stored tail is dropped instead of blended
//!
//! Chunks do not overlap in time, so nothing is held back or dropped at a
//! seam. Audio that is already continuous passes through almost unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shape of the cross-fade between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossfadeCurve {
    Linear,
    /// Raised cosine (smooth start and end)
    Cosine,
}

impl CrossfadeCurve {
    /// Fade-in weight at normalized position `t` in (0, 1).
    fn fade_in(&self, t: f32) -> f32 {
        match self {
            CrossfadeCurve::Linear => t,
            CrossfadeCurve::Cosine => 0.5 - 0.5 * (std::f32::consts::PI * t).cos(),
        }
    }
}

/// Configuration for the stitcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherConfig {
    /// Overlap window in milliseconds.
    pub overlap_ms: u32,
    /// Cross-fade curve.
    pub curve: CrossfadeCurve,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            overlap_ms: 20,
            curve: CrossfadeCurve::Cosine,
        }
    }
}

impl StitcherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.overlap_ms == 0 || self.overlap_ms > 1000 {
            return Err(format!(
                "Chunk overlap must be between 1 and 1000 ms, got {}",
                self.overlap_ms
            ));
        }
        Ok(())
    }
}

/// Per-session cross-fader for the streaming path.
#[derive(Debug, Clone)]
pub struct ChunkStitcher {
    config: StitcherConfig,
    /// Last `overlap` samples of the previous converted chunk.
    tail: Vec<f32>,
    tail_rate: u32,
}

impl ChunkStitcher {
    pub fn new() -> Self {
        Self::with_config(StitcherConfig::default())
    }

    pub fn with_config(config: StitcherConfig) -> Self {
        Self {
            config,
            tail: Vec::new(),
            tail_rate: 0,
        }
    }

    /// Number of overlap samples at `sample_rate`.
    pub fn overlap_samples(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.config.overlap_ms as u64 / 1000) as usize
    }

    /// Whether a tail from an earlier chunk is waiting to be blended.
    pub fn has_tail(&self) -> bool {
        !self.tail.is_empty()
    }

    /// Bend the head of `samples` onto the stored tail and remember the new tail.
    pub fn process_chunk(&mut self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let overlap = self.overlap_samples(sample_rate);
        let mut output = samples.to_vec();

        if self.has_tail() && self.tail_rate != sample_rate {
            debug!(
                previous_rate = self.tail_rate,
                sample_rate, "Sample rate changed between chunks, dropping overlap tail"
            );
            self.tail.clear();
        }

        if let (Some(expected), Some(&first)) = (self.continuation(), output.first()) {
            let offset = expected - first;
            let blend_len = overlap.min(self.tail.len()).min(output.len());
            for (i, out) in output.iter_mut().take(blend_len).enumerate() {
                let t = (i as f32 + 1.0) / (blend_len as f32 + 1.0);
                *out += offset * (1.0 - self.config.curve.fade_in(t));
            }
        }

        self.tail.extend_from_slice(&output);
        let excess = self.tail.len().saturating_sub(overlap);
        self.tail.drain(..excess);
        self.tail_rate = sample_rate;

        output
    }

    /// Next sample the stored tail predicts, by linear extrapolation of its last two samples.
    fn continuation(&self) -> Option<f32> {
        match self.tail.as_slice() {
            [] => None,
            [only] => Some(*only),
            [.., before, last] => Some(last + (last - before)),
        }
    }

    /// Forget the stored tail; the next chunk is treated as the first.
    pub fn reset(&mut self) {
        self.tail.clear();
        self.tail_rate = 0;
    }

    pub fn config(&self) -> &StitcherConfig {
        &self.config
    }
}

impl Default for ChunkStitcher {
    fn default() -> Self {
        Self::new()
    }
}
