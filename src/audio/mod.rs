//! # Audio Processing Module
//!
//! Sample-level building blocks used by the conversion pipeline.
//!
//! ## Key Components:
//! - **Sample Buffer**: Mono `f32` samples tagged with their sample rate
//! - **WAV Codec**: Decode uploads (WAV or raw PCM16) and encode responses
//! - **Resampler**: Linear-interpolation rate conversion
//! - **Pitch Shifter**: Length-preserving granular shifter used by demo mode
//! - **Band EQ**: Five-band split used by EQ fluctuation
//! - **Noise Injector**: Synthetic or ambience-bed background noise
//! - **Chunk Stitcher**: Cross-fades consecutive streaming chunks
//!
//! ## Audio Format Conventions:
//! - **Channels**: Mono inside the pipeline (the codec downmixes)
//! - **Range**: Samples nominally in [-1.0, 1.0]
//! - **Output encoding**: 16-bit PCM WAV

pub mod buffer;
pub mod eq;
pub mod noise;
pub mod pitch;
pub mod resample;
pub mod stitcher;
pub mod wav;

pub use buffer::SampleBuffer;
pub use noise::{NoiseInjector, NoiseType};
pub use stitcher::{ChunkStitcher, CrossfadeCurve, StitcherConfig};
