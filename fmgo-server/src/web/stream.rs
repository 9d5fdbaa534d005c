//! Live audio endpoint.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use log::info;

use crate::web::state::WebState;

/// Chunked `audio/mpeg` body following the live session.
///
/// Never starts a pipeline: when nothing is playing the answer is 503.
pub async fn audio_stream(State(web_state): State<Arc<WebState>>) -> Response {
    let Some(subscription) = web_state.controller.subscribe().await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Stream not active",
        )
            .into_response();
    };

    info!("[Listener {}] Connected", subscription.id);
    let body = Body::from_stream(subscription.into_stream());

    (
        [
            (CONTENT_TYPE, "audio/mpeg"),
            (CACHE_CONTROL, "no-cache, no-store"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}
