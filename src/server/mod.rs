use crate::config::Config;
use crate::streaming::{
    self, start_sweep_task, ContentProvider, LocalLibrary, SessionRegistry, StreamingSettings,
};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use castforge_av::{FfprobeProber, Prober, Toolchain};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub toolchain: Arc<Toolchain>,
    pub settings: Arc<StreamingSettings>,
    /// Active adaptive sessions
    pub registry: Arc<SessionRegistry>,
    /// Resolves file references to library files
    pub content: Arc<dyn ContentProvider>,
    /// Cancelled on shutdown; every direct transcode is a child of it
    pub shutdown: CancellationToken,
    /// Tracks encoder supervisors so shutdown can wait for them
    pub tracker: TaskTracker,
}

impl AppContext {
    /// Build the context from configuration, discovering ffmpeg/ffprobe.
    pub fn new(config: Config) -> Self {
        let toolchain = Toolchain::discover(
            config.tools.ffmpeg_path.as_deref(),
            config.tools.ffprobe_path.as_deref(),
        );
        let prober = Arc::new(FfprobeProber::new(
            toolchain.ffprobe.clone(),
            config.streaming.probe_timeout(),
        ));
        let content = Arc::new(LocalLibrary::new(config.library.root.clone()));
        Self::with_parts(config, toolchain, prober, content)
    }

    /// Build the context around explicit collaborators.
    pub fn with_parts(
        config: Config,
        toolchain: Toolchain,
        prober: Arc<dyn Prober>,
        content: Arc<dyn ContentProvider>,
    ) -> Self {
        let settings = Arc::new(StreamingSettings::from_config(&config.streaming, &toolchain));
        let tracker = TaskTracker::new();
        let registry = Arc::new(SessionRegistry::new(
            prober,
            Arc::clone(&settings),
            tracker.clone(),
        ));

        Self {
            config: Arc::new(config),
            toolchain: Arc::new(toolchain),
            settings,
            registry,
            content,
            shutdown: CancellationToken::new(),
            tracker,
        }
    }

    /// Stop every direct transcode and session, then wait for their encoders.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown().await;
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("All encoders released");
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::RANGE])
        .expose_headers([header::CONTENT_RANGE, header::ACCEPT_RANGES]);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    Router::new()
        .nest("/hls", streaming::hls_router())
        .nest("/direct", streaming::direct_router())
}

async fn health_check(
    axum::extract::State(ctx): axum::extract::State<AppContext>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "sessions": ctx.registry.len(),
        })),
    )
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    clear_stale_sessions(&config).await;

    let ctx = AppContext::new(config);

    tracing::info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, ctx, shutdown_signal()).await
}

/// Remove session output left by a previous run.
///
/// Sessions never survive a restart. Only the server-owned session root is
/// cleared; anything else under `scratch_dir` is untouched.
pub async fn clear_stale_sessions(config: &Config) {
    castforge_av::workspace::remove_dir_best_effort(&config.streaming.session_root()).await;
}

/// Serve on an already-bound listener until `signal` resolves, then drain.
pub async fn serve(
    listener: TcpListener,
    ctx: AppContext,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let sweep = start_sweep_task(
        Arc::clone(&ctx.registry),
        ctx.config.streaming.sweep_interval(),
        ctx.shutdown.clone(),
    );

    // Open direct streams would hold graceful shutdown forever; cancelling
    // the root token ends them.
    let token = ctx.shutdown.clone();
    let graceful = async move {
        signal.await;
        token.cancel();
    };

    let app = create_router(ctx.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await?;

    ctx.shutdown().await;
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Sweep task ended abnormally");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
