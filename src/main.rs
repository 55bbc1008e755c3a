//! # Makebeliv Backend - Main Application Entry Point
//!
//! Sets up an Actix-web HTTP server around the voice conversion pipeline.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc**: Thread-safe shared ownership of the pipeline and metrics
//! - **static**: Global shutdown flag that lives for the entire program duration
//!
//! ## Startup Sequence:
//! 1. Load `.env`, then configuration (defaults, `config.toml`, `APP_` variables)
//! 2. Validate configuration and set up tracing
//! 3. Build the shared state: engine registry, noise injector, pipeline
//! 4. Start the idle-session sweeper
//! 5. Serve HTTP until SIGINT/SIGTERM

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use makebeliv_backend::config::AppConfig;
use makebeliv_backend::device::DeviceManager;
use makebeliv_backend::state::AppState;
use makebeliv_backend::{handlers, health, middleware};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## Error Handling:
/// If any step fails (config loading, server binding, etc.), the function returns an error
/// and the program exits with an error message.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting makebeliv-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        models_dir = %config.models.models_dir,
        default_model = %config.models.default_model,
        device = %DeviceManager::describe(config.models.device),
        "Model settings"
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    let sweeper = spawn_session_sweeper(app_state.clone(), &config);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec!["X-Processing-Time-Ms", "X-Audio-Length-Seconds", "X-Request-Id"])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order of registration for requests
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::root))
            .route("/status", web::get().to(health::status))
            .route("/health", web::get().to(health::health_check))
            .route("/convert", web::post().to(handlers::convert))
            .route("/convert-chunk", web::post().to(handlers::convert_chunk))
            .route("/reset-session", web::post().to(handlers::reset_session))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    sweeper.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "makebeliv_backend=trace")
/// - If not set, defaults to "makebeliv_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "makebeliv_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically drop streaming sessions nobody has touched for `session_idle_secs`.
fn spawn_session_sweeper(state: AppState, config: &AppConfig) -> tokio::task::JoinHandle<()> {
    let idle_limit = config.session_idle_limit();
    let period = Duration::from_secs(config.performance.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.registry().evict_idle_sessions(idle_limit);
        }
    })
}

/// Set up signal handlers for graceful shutdown.
///
/// ## What this does:
/// - Listens for SIGTERM (termination signal from system)
/// - Listens for SIGINT (interrupt signal, usually Ctrl+C)
/// - When either signal is received, sets the global shutdown flag
///
/// A handler that cannot be installed is logged; the other one still works.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (term, int) => {
                warn!(
                    sigterm_ok = term.is_ok(),
                    sigint_ok = int.is_ok(),
                    "Failed to install signal handlers, falling back to Ctrl+C"
                );
                if tokio::signal::ctrl_c().await.is_ok() {
                    SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
