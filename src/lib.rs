//! # Makebeliv Backend
//!
//! Streaming voice conversion service. An input recording (or a live chunk)
//! is converted by a voice model, given a slow human-like drift in pitch,
//! volume and tone, optionally cross-faded with the previous chunk of the
//! same stream, and finally mixed with background noise.
//!
//! ## Module Layout:
//! - **audio**: sample buffers, WAV codec, resampling, pitch shifting, EQ, noise, chunk stitching
//! - **fluctuation**: the temporally smoothed drift generator
//! - **conversion**: inference backend contract, conversion engines and the engine registry
//! - **pipeline**: runs a request through all stages with a deadline
//! - **config / state / health / middleware / handlers**: the HTTP service around it
//! - **error**: core and transport error types

pub mod audio;
pub mod config;
pub mod conversion;
pub mod device;
pub mod error;
pub mod fluctuation;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod pipeline;
pub mod state;
