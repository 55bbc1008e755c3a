//! # Application State Management
//!
//! This module manages state shared by every HTTP request handler: the loaded
//! configuration, request metrics, and the voice pipeline with its engine
//! registry.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: actix-web builds one `App` per worker thread, and each of them
//!   receives a clone of this state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time
//! - **parking_lot**: Its locks do not poison, so reads and writes never return a `Result`
//!
//! ### What is NOT behind a lock
//! - The configuration is immutable after startup, so a plain `Arc` is enough
//! - The pipeline synchronizes internally (see `conversion::registry`)

use crate::audio::NoiseInjector;
use crate::config::AppConfig;
use crate::conversion::{CandleBackend, EngineRegistry, InferenceBackend};
use crate::pipeline::{PipelineSettings, VoicePipeline};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning copies the `Arc` pointers, not the data behind them
/// - **Arc<RwLock<T>>**: Thread-safe shared mutable data
/// - **Instant**: A point in time (for measuring uptime)
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup
    pub config: Arc<AppConfig>,

    /// Performance metrics, updated by the middleware and the conversion handlers
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The conversion pipeline and its engine registry
    pub pipeline: VoicePipeline,

    /// When the server started (never changes)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: load and reliability monitoring
/// - **conversion**: how often the pipeline ran, degraded or failed
/// - **endpoint_metrics**: per-endpoint statistics (for performance optimization)
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Counters for pipeline runs
    pub conversion: ConversionMetrics,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Pipeline run counters.
#[derive(Debug, Default, Clone)]
pub struct ConversionMetrics {
    /// Successful runs, degraded ones included
    pub conversions: u64,

    /// Runs that timed out or passed audio through after a failure
    pub degraded: u64,

    /// Runs that returned an error to the caller
    pub failures: u64,

    /// Sum of processing time over successful runs (milliseconds)
    pub total_processing_ms: f64,

    /// Sum of output audio length over successful runs (seconds)
    pub total_audio_seconds: f64,
}

impl ConversionMetrics {
    pub fn average_processing_ms(&self) -> f64 {
        if self.conversions > 0 {
            self.total_processing_ms / self.conversions as f64
        } else {
            0.0
        }
    }

    /// Processing time divided by audio length. Below 1.0 is faster than real time.
    pub fn real_time_factor(&self) -> f64 {
        if self.total_audio_seconds > 0.0 {
            self.total_processing_ms / 1000.0 / self.total_audio_seconds
        } else {
            0.0
        }
    }
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create the state with the candle backend.
    pub fn new(config: AppConfig) -> Self {
        Self::with_backend(config, Arc::new(CandleBackend))
    }

    /// Create the state around any inference backend.
    ///
    /// ## What this does:
    /// 1. Builds the engine registry from the model, conversion, fluctuation and streaming sections
    /// 2. Builds the noise injector over the optional ambience directory
    /// 3. Wraps both in a `VoicePipeline` with the configured deadline and failure policy
    /// 4. Records the current time as the server start time
    pub fn with_backend(config: AppConfig, backend: Arc<dyn InferenceBackend>) -> Self {
        let registry = Arc::new(EngineRegistry::new(config.registry_settings(), backend));
        let noise = Arc::new(NoiseInjector::new(config.noise.ambience_dir.as_ref().map(PathBuf::from)));
        let pipeline = VoicePipeline::new(registry, noise, PipelineSettings::from_config(&config));

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &EngineRegistry {
        self.pipeline.registry()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    /// Increment the total error counter (called for every 4xx/5xx response).
    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, `.entry().or_default()` creates a new
    /// EndpointMetric. Subsequent requests update it in place.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Record a pipeline run that produced audio.
    pub fn record_conversion(&self, processing_ms: f64, audio_seconds: f64, degraded: bool) {
        let mut metrics = self.metrics.write();
        let conversion = &mut metrics.conversion;
        conversion.conversions += 1;
        conversion.total_processing_ms += processing_ms;
        conversion.total_audio_seconds += audio_seconds;
        if degraded {
            conversion.degraded += 1;
        }
    }

    /// Record a pipeline run that returned an error.
    pub fn record_conversion_failure(&self) {
        self.metrics.write().conversion.failures += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    /// Live streaming sessions in the registry.
    pub fn active_sessions(&self) -> usize {
        self.registry().session_count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
