//! # Engine Registry
//!
//! Process-wide home for conversion engines and per-session streaming state.
//! Constructed once at startup and shared with every request handler.
//!
//! ## Key Features:
//! - **Construct-once engines**: one engine per (model, pitch shift) key, built
//!   exactly once even when several requests ask for a new key at the same time
//! - **Session state**: each session id owns a fluctuation generator and a
//!   chunk stitcher behind a single mutex, so a call's fluctuation and
//!   stitching steps for one session never interleave with another call's
//! - **Bounded sessions**: least-recently-used eviction at `max_sessions`, plus
//!   an idle sweep; engines are never evicted
//!
//! ## Locking:
//! The map mutexes are held only for lookups and inserts. Engine construction
//! (the model load) happens inside the key's `OnceLock`, outside the map lock,
//! so loading one model never blocks lookups of another.

use crate::audio::{ChunkStitcher, StitcherConfig};
use crate::conversion::backend::InferenceBackend;
use crate::conversion::engine::{ConversionDefaults, ConversionEngine};
use crate::device::DevicePreference;
use crate::error::{PipelineError, PipelineResult};
use crate::fluctuation::{FluctuationConfig, FluctuationGenerator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Streaming state owned by one session.
pub struct SessionState {
    pub generator: FluctuationGenerator,
    pub stitcher: ChunkStitcher,
}

impl SessionState {
    fn new(settings: &RegistrySettings) -> PipelineResult<Self> {
        Ok(Self {
            generator: FluctuationGenerator::new(settings.fluctuation.clone())?,
            stitcher: ChunkStitcher::with_config(settings.stitcher.clone()),
        })
    }

    /// Back to the state of a freshly created session.
    pub fn reset(&mut self) {
        self.generator.reset();
        self.stitcher.reset();
    }
}

/// Shared, lockable session state.
pub type SessionHandle = Arc<Mutex<SessionState>>;

type EngineSlot = Arc<OnceLock<PipelineResult<Arc<ConversionEngine>>>>;

/// Cache key for conversion engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub model: String,
    pub pitch_shift: i32,
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.model, self.pitch_shift)
    }
}

/// Settings the registry needs to build engines and sessions.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Models live at `<models_dir>/<name>/model.pth`
    pub models_dir: PathBuf,
    pub device: DevicePreference,
    pub conversion: ConversionDefaults,
    pub fluctuation: FluctuationConfig,
    pub stitcher: StitcherConfig,
    pub max_sessions: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            device: DevicePreference::Auto,
            conversion: ConversionDefaults::default(),
            fluctuation: FluctuationConfig::default(),
            stitcher: StitcherConfig::default(),
            max_sessions: 256,
        }
    }
}

struct SessionEntry {
    state: SessionHandle,
    last_used: Instant,
}

/// Process-scoped cache of engines and session state.
pub struct EngineRegistry {
    settings: RegistrySettings,
    backend: Arc<dyn InferenceBackend>,
    engines: Mutex<HashMap<EngineKey, EngineSlot>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl EngineRegistry {
    pub fn new(settings: RegistrySettings, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            settings,
            backend,
            engines: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Conventional checkpoint location for `model_name`.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.settings.models_dir.join(model_name).join("model.pth")
    }

    /// Return the engine for `(model_name, pitch_shift)`, building it on first use.
    ///
    /// ## Concurrency:
    /// Callers racing on a new key share one `OnceLock`; exactly one of them runs
    /// the constructor and all of them receive the same `Arc`.
    ///
    /// ## Errors:
    /// - `Config` for a model name that is empty or would escape the models directory
    /// - `Config` when the engine configuration is invalid (the failed slot is dropped)
    pub fn get_or_create_conversion_engine(
        &self,
        model_name: &str,
        pitch_shift: i32,
    ) -> PipelineResult<Arc<ConversionEngine>> {
        validate_model_name(model_name)?;
        let key = EngineKey {
            model: model_name.to_string(),
            pitch_shift,
        };

        let slot = {
            let mut engines = self.engines.lock();
            engines
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };

        let result = slot
            .get_or_init(|| {
                info!(key = %key, "Creating conversion engine");
                let config = self.settings.conversion.for_model(
                    self.model_path(model_name),
                    pitch_shift,
                    self.settings.device,
                );
                ConversionEngine::new(config, Arc::clone(&self.backend)).map(Arc::new)
            })
            .clone();

        if result.is_err() {
            let mut engines = self.engines.lock();
            if engines.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                engines.remove(&key);
            }
        }

        result
    }

    /// Return the session's state, creating it on first use.
    ///
    /// Callers racing on a new id get the same `Arc`; the map lock is held
    /// across the lookup and the insert.
    pub fn get_or_create_session(&self, session_id: &str) -> PipelineResult<SessionHandle> {
        let mut sessions = self.sessions.lock();

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.state));
        }

        let state = Arc::new(Mutex::new(SessionState::new(&self.settings)?));

        if sessions.len() >= self.settings.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                info!(evicted = %oldest, "Session limit reached, evicted least recently used session");
            }
        }

        debug!(session_id, "Creating session state");
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                state: Arc::clone(&state),
                last_used: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Return the session holding the fluctuation generator for `session_id`.
    ///
    /// The generator shares its lock with the session's stitcher.
    pub fn get_or_create_fluctuation_generator(&self, session_id: &str) -> PipelineResult<SessionHandle> {
        self.get_or_create_session(session_id)
    }

    /// Reset the session's fluctuation and stitching state.
    ///
    /// ## Returns:
    /// `true` when the session existed, `false` otherwise (not an error).
    pub fn reset_session(&self, session_id: &str) -> bool {
        let state = {
            let mut sessions = self.sessions.lock();
            sessions.get_mut(session_id).map(|entry| {
                entry.last_used = Instant::now();
                Arc::clone(&entry.state)
            })
        };

        match state {
            Some(state) => {
                state.lock().reset();
                info!(session_id, "Session reset");
                true
            }
            None => {
                debug!(session_id, "Reset requested for unknown session");
                false
            }
        }
    }

    /// Drop a session entirely. Returns whether it existed.
    pub fn evict_session(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Drop every session untouched for longer than `max_idle`. Returns how many went.
    pub fn evict_idle_sessions(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() <= max_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of successfully constructed engines.
    pub fn engine_count(&self) -> usize {
        self.engines
            .lock()
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    /// Keys of constructed engines, formatted as `model_pitch`.
    pub fn engine_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .engines
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot.get(), Some(Ok(_))))
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        keys
    }
}

fn validate_model_name(model_name: &str) -> PipelineResult<()> {
    let valid = !model_name.is_empty()
        && model_name != "."
        && model_name != ".."
        && model_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("Invalid model name: {:?}", model_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::backend::{BackendError, F0Method, ModelHandle};
    use crate::conversion::ConversionConfig;
    use crate::fluctuation::FluctuationState;
    use candle_core::Device;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Backend that counts loads and takes a while to load, to widen races.
    #[derive(Default)]
    struct CountingBackend {
        loads: AtomicUsize,
    }

    impl InferenceBackend for CountingBackend {
        fn load(&self, path: &Path, _device: &Device) -> Result<ModelHandle, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Err(BackendError::NotFound(path.to_path_buf()))
        }

        fn extract_pitch_contour(&self, samples: &[f32], _sample_rate: u32, _method: F0Method) -> Vec<f32> {
            vec![0.0; samples.len() / 512]
        }

        fn infer(
            &self,
            _model: &ModelHandle,
            _samples: &[f32],
            _sample_rate: u32,
            _contour: &[f32],
            _config: &ConversionConfig,
        ) -> Result<Vec<f32>, BackendError> {
            Err(BackendError::Unsupported("counting backend".to_string()))
        }
    }

    fn registry_with(backend: Arc<CountingBackend>, max_sessions: usize) -> EngineRegistry {
        let settings = RegistrySettings {
            device: DevicePreference::Cpu,
            max_sessions,
            ..Default::default()
        };
        EngineRegistry::new(settings, backend)
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let backend = Arc::new(CountingBackend::default());
        let registry = registry_with(Arc::clone(&backend), 16);
        let barrier = Barrier::new(8);

        let engines: Vec<Arc<ConversionEngine>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.get_or_create_conversion_engine("alice", 3).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert_eq!(registry.engine_count(), 1);
    }

    #[test]
    fn test_engines_are_keyed_by_model_and_pitch() {
        let backend = Arc::new(CountingBackend::default());
        let registry = registry_with(Arc::clone(&backend), 16);

        let a = registry.get_or_create_conversion_engine("alice", 0).unwrap();
        let b = registry.get_or_create_conversion_engine("alice", 5).unwrap();
        let again = registry.get_or_create_conversion_engine("alice", 0).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
        assert_eq!(registry.engine_keys(), vec!["alice_0".to_string(), "alice_5".to_string()]);
        assert_eq!(a.config().model_path, PathBuf::from("models/alice/model.pth"));
    }

    #[test]
    fn test_invalid_model_names_are_rejected() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 16);
        for name in ["", "..", "../secrets", "a/b"] {
            assert!(matches!(
                registry.get_or_create_conversion_engine(name, 0),
                Err(PipelineError::Config(_))
            ));
        }
        assert_eq!(registry.engine_count(), 0);
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        let mut settings = RegistrySettings {
            device: DevicePreference::Cpu,
            ..Default::default()
        };
        settings.conversion.protect = 2.0;
        let registry = EngineRegistry::new(settings, Arc::new(CountingBackend::default()));

        assert!(registry.get_or_create_conversion_engine("alice", 0).is_err());
        assert!(registry.engines.lock().is_empty());
    }

    #[test]
    fn test_session_state_is_reused() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 16);
        let first = registry.get_or_create_fluctuation_generator("s1").unwrap();
        let second = registry.get_or_create_session("s1").unwrap();
        let other = registry.get_or_create_fluctuation_generator("s2").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_concurrent_first_session_access_shares_state() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 16);
        let barrier = Barrier::new(8);

        let sessions: Vec<SessionHandle> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.get_or_create_fluctuation_generator("shared").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_concurrent_callers_advance_one_generator_sequence() {
        let fluctuation = FluctuationConfig {
            seed: Some(99),
            ..Default::default()
        };
        let settings = RegistrySettings {
            device: DevicePreference::Cpu,
            fluctuation: fluctuation.clone(),
            ..Default::default()
        };
        let registry = EngineRegistry::new(settings, Arc::new(CountingBackend::default()));
        let observed = Mutex::new(Vec::new());
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    for _ in 0..25 {
                        let session = registry.get_or_create_fluctuation_generator("s").unwrap();
                        let mut session = session.lock();
                        session.generator.generate_volume_factor();
                        observed.lock().push(session.generator.state());
                    }
                });
            }
        });

        let mut expected = FluctuationGenerator::new(fluctuation).unwrap();
        let sequence: Vec<FluctuationState> = (0..200)
            .map(|_| {
                expected.generate_volume_factor();
                expected.state()
            })
            .collect();
        assert_eq!(observed.into_inner(), sequence);
    }

    #[test]
    fn test_reset_session() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 16);
        assert!(!registry.reset_session("missing"));

        let session = registry.get_or_create_session("s1").unwrap();
        {
            let mut state = session.lock();
            state.generator.generate_volume_factor();
            state.stitcher.process_chunk(&[0.5; 640], 16000);
        }

        assert!(registry.reset_session("s1"));
        let state = session.lock();
        assert_eq!(state.generator.state(), FluctuationState::default());
        assert!(!state.stitcher.has_tail());
    }

    #[test]
    fn test_least_recently_used_session_is_evicted() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 2);
        registry.get_or_create_session("a").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        registry.get_or_create_session("b").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        registry.get_or_create_fluctuation_generator("a").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        registry.get_or_create_session("c").unwrap();

        assert_eq!(registry.session_count(), 2);
        assert!(registry.has_session("a"));
        assert!(!registry.has_session("b"));
        assert!(registry.has_session("c"));
    }

    #[test]
    fn test_idle_sessions_are_evicted() {
        let registry = registry_with(Arc::new(CountingBackend::default()), 16);
        registry.get_or_create_fluctuation_generator("old").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        registry.get_or_create_fluctuation_generator("fresh").unwrap();

        assert_eq!(registry.evict_idle_sessions(Duration::from_millis(10)), 1);
        assert!(registry.has_session("fresh"));
        assert!(registry.evict_session("fresh"));
        assert!(!registry.evict_session("fresh"));
    }

    #[test]
    fn test_engine_key_display() {
        let key = EngineKey { model: "default".to_string(), pitch_shift: -2 };
        assert_eq!(key.to_string(), "default_-2");
    }
}
