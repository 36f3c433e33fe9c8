use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use cascade_core::CascadeService;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod routes;
mod settings;
mod validation;
mod ws;

use settings::Settings;

// Application State
pub struct AppState {
    pub service: CascadeService,
    pub settings: Settings,
}

fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.settings.max_upload_bytes;
    let static_dir = state.settings.static_dir.clone();

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/execute", post(routes::execute))
        .route("/api/validate", post(routes::validate))
        .route("/api/export/stl", post(routes::export_stl))
        .route("/api/export/obj", post(routes::export_obj))
        .route("/api/export/step", post(routes::export_step))
        .route(
            "/api/import",
            post(routes::import).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/ws", get(ws::ws_handler));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let addr = settings.addr;
    info!(
        max_workers = settings.service.pool.max_workers,
        eval_timeout_ms = settings.service.timeouts.evaluate.as_millis() as u64,
        "starting cascade backend"
    );

    let service = CascadeService::new(settings.service.clone());
    let _sweeper = service.start_sweeper();
    let state = Arc::new(AppState { service, settings });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
