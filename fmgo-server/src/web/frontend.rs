//! Front-end entry page.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use log::warn;

use crate::web::state::WebState;

/// Serve `index.html`, or a 503 page when the front end is not installed.
pub async fn index(State(web_state): State<Arc<WebState>>) -> Response {
    let path = web_state.frontend_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Front end unavailable ({}): {}", path.display(), e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Html(missing_frontend_page(&web_state.frontend_dir.display().to_string())),
            )
                .into_response()
        }
    }
}

fn missing_frontend_page(dir: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>FM-Go</title>
</head>
<body>
    <h1>FM-Go</h1>
    <p>The web interface is not installed.</p>
    <p>Expected front-end files in <code>{}</code>.</p>
    <p>The API is available under <code>/api/</code>.</p>
</body>
</html>
"#,
        dir
    )
}
