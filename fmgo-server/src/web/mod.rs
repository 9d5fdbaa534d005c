//! HTTP surface: JSON API, live audio stream and the static front end.

pub mod api;
pub mod frontend;
pub mod state;
pub mod stream;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use state::WebState;

/// Build the application router.
pub fn router(web_state: Arc<WebState>) -> Router {
    let static_files = ServeDir::new(&web_state.frontend_dir);

    Router::new()
        .route("/api/status", get(api::get_status))
        .route("/api/config", get(api::get_config).post(api::update_config))
        // Presets
        .route("/api/presets", get(api::get_presets).post(api::add_preset))
        .route(
            "/api/presets/:id",
            axum::routing::put(api::update_preset).delete(api::delete_preset),
        )
        // Playback
        .route("/api/tune", post(api::tune))
        .route("/api/play", post(api::play))
        .route("/api/stop", post(api::stop))
        .route("/api/stream", get(stream::audio_stream))
        // Front end
        .route("/", get(frontend::index))
        .fallback_service(static_files)
        .with_state(web_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serve until `shutdown` resolves.
pub async fn start_web_server<F>(
    listen_addr: SocketAddr,
    web_state: Arc<WebState>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(web_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Web server listening on http://{}", listen_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
