//! # Voice Conversion
//!
//! Engines that turn one voice into another, the backend contract they
//! delegate to, and the registry that caches them.
//!
//! ## Components:
//! - **backend**: `InferenceBackend` trait and the candle-based implementation
//! - **engine**: `ConversionEngine`, one per (model, pitch shift), with demo-mode fallback
//! - **registry**: `EngineRegistry`, construct-once engines plus per-session state

pub mod backend;
pub mod engine;
pub mod registry;

pub use backend::{BackendError, CandleBackend, F0Method, InferenceBackend, ModelHandle};
pub use engine::{ConversionConfig, ConversionDefaults, ConversionEngine};
pub use registry::{EngineKey, EngineRegistry, RegistrySettings, SessionHandle, SessionState};
