//! Web API endpoints for status, configuration, presets and playback.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fmgo_protocol::{
    Gain, LaunchError, PresetList, PresetPatch, StationConfig, StationConfigPatch, StatusReport,
    TuneError, TuningRequest,
};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::{LaunchMode, LaunchReport};
use crate::store::StoreError;
use crate::web::state::WebState;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

// ============================================================================
// Errors
// ============================================================================

/// Error body: `{"success": false, "error": "...", "code": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.message,
                "code": self.code,
            })),
        )
            .into_response()
    }
}

impl From<TuneError> for ApiError {
    fn from(e: TuneError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.code(), e.to_string())
    }
}

impl From<LaunchError> for ApiError {
    fn from(e: LaunchError) -> Self {
        let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(e) => e.into(),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store-error", other.to_string()),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ============================================================================
// Request bodies
// ============================================================================

/// Frequency as sent by clients: a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrequencyValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FrequencyValue {
    fn hz(self) -> Result<i64, TuneError> {
        let not_whole = || TuneError::InvalidValue {
            field: "frequency",
            reason: "must be a whole number of Hz".to_string(),
        };
        match self {
            FrequencyValue::Integer(hz) => Ok(hz),
            FrequencyValue::Float(hz) if hz.is_finite() && hz.fract() == 0.0 => Ok(hz as i64),
            FrequencyValue::Float(_) => Err(not_whole()),
            FrequencyValue::Text(text) => text.trim().parse().map_err(|_| not_whole()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TuneBody {
    frequency: Option<FrequencyValue>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayBody {
    frequency: Option<FrequencyValue>,
    gain: Option<Gain>,
}

/// Parse a JSON body; an empty body means "no fields".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid-json", format!("Invalid JSON body: {}", e)))
}

// ============================================================================
// Status
// ============================================================================

/// Get device, playback and host status.
pub async fn get_status(State(web_state): State<Arc<WebState>>) -> Json<StatusReport> {
    let session = web_state.controller.snapshot();
    let rtl_sdr_detected = web_state.controller.device_present().await;

    Json(StatusReport {
        rtl_sdr_detected,
        is_playing: session.is_playing,
        current_frequency: session.current_frequency,
        service_running: true,
        cpu_temperature: cpu_temperature().await,
        rds_ps: None,
        rds_radiotext: None,
    })
}

async fn cpu_temperature() -> Option<f64> {
    let raw = tokio::fs::read_to_string(THERMAL_ZONE).await.ok()?;
    parse_thermal(&raw)
}

/// Millidegrees as printed by the thermal zone, to °C with one decimal.
fn parse_thermal(raw: &str) -> Option<f64> {
    let millidegrees: f64 = raw.trim().parse().ok()?;
    Some((millidegrees / 100.0).round() / 10.0)
}

// ============================================================================
// Station configuration
// ============================================================================

/// Get the persisted station config.
pub async fn get_config(State(web_state): State<Arc<WebState>>) -> Json<StationConfig> {
    Json(web_state.store.lock().await.config().clone())
}

/// Merge recognized keys into the station config.
///
/// A running stream is relaunched when the frequency or the gain changed.
/// The saved config stands even if that relaunch fails.
pub async fn update_config(State(web_state): State<Arc<WebState>>, body: Bytes) -> ApiResult {
    let patch: StationConfigPatch = parse_body(&body)?;

    let (config, change) = {
        let mut store = web_state.store.lock().await;
        let change = store.update_config(patch)?;
        (store.config().clone(), change)
    };
    info!("Configuration updated");

    let mut response = json!({
        "success": true,
        "config": config,
    });

    if change.requires_relaunch() && web_state.controller.is_playing() {
        let relaunch = match TuningRequest::new(config.frequency.into(), Some(config.gain)) {
            Ok(request) => {
                web_state
                    .controller
                    .launch(request, &config, LaunchMode::ColdStart)
                    .await
            }
            Err(e) => Err(LaunchError::from(e)),
        };
        if let Err(e) = relaunch {
            warn!("Failed to restart stream with new configuration: {}", e);
            response["restart_error"] = json!(e.to_string());
        }
    }

    Ok(Json(response))
}

// ============================================================================
// Presets
// ============================================================================

pub async fn get_presets(State(web_state): State<Arc<WebState>>) -> Json<PresetList> {
    Json(web_state.store.lock().await.presets().clone())
}

pub async fn add_preset(State(web_state): State<Arc<WebState>>, body: Bytes) -> ApiResult {
    let patch: PresetPatch = parse_body(&body)?;
    let preset = web_state.store.lock().await.add_preset(patch)?;
    info!("Preset {} added: {} ({} Hz)", preset.id, preset.name, preset.frequency);
    Ok(Json(json!({
        "success": true,
        "preset": preset,
    })))
}

pub async fn update_preset(
    State(web_state): State<Arc<WebState>>,
    Path(id): Path<u32>,
    body: Bytes,
) -> ApiResult {
    let patch: PresetPatch = parse_body(&body)?;
    let preset = web_state
        .store
        .lock()
        .await
        .update_preset(id, patch)?
        .ok_or_else(|| ApiError::not_found(format!("Preset {} not found", id)))?;
    Ok(Json(json!({
        "success": true,
        "preset": preset,
    })))
}

pub async fn delete_preset(State(web_state): State<Arc<WebState>>, Path(id): Path<u32>) -> ApiResult {
    if web_state.store.lock().await.delete_preset(id)? {
        info!("Preset {} deleted", id);
    }
    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Playback
// ============================================================================

/// Tune to a frequency, starting the stream if needed, and remember it.
pub async fn tune(State(web_state): State<Arc<WebState>>, body: Bytes) -> ApiResult {
    let body: TuneBody = parse_body(&body)?;
    let frequency = body
        .frequency
        .ok_or(TuneError::MissingField("frequency"))?
        .hz()?;

    let config = web_state.store.lock().await.config().clone();
    let request = TuningRequest::new(frequency, Some(config.gain))?;
    let mode = if web_state.controller.is_playing() {
        LaunchMode::Retune
    } else {
        LaunchMode::ColdStart
    };

    let report = launch_and_remember(&web_state, request, config, mode).await?;

    Ok(Json(json!({
        "success": true,
        "frequency": report.frequency_hz,
    })))
}

/// Start playback at the given or the saved frequency and gain.
pub async fn play(State(web_state): State<Arc<WebState>>, body: Bytes) -> ApiResult {
    let body: PlayBody = parse_body(&body)?;

    let config = web_state.store.lock().await.config().clone();
    let frequency = match body.frequency {
        Some(value) => value.hz()?,
        None => config.frequency.into(),
    };
    let request = TuningRequest::new(frequency, Some(body.gain.unwrap_or(config.gain)))?;

    let report = launch_and_remember(&web_state, request, config, LaunchMode::ColdStart).await?;

    Ok(Json(json!({
        "success": true,
        "frequency": report.frequency_hz,
    })))
}

pub async fn stop(State(web_state): State<Arc<WebState>>) -> Json<Value> {
    let controller = &web_state.controller;
    controller.stop(controller.settings().cold_stop_timeout()).await;
    Json(json!({ "success": true }))
}

/// Launch, then save the tuned frequency, on a task that outlives the request.
async fn launch_and_remember(
    web_state: &Arc<WebState>,
    request: TuningRequest,
    config: StationConfig,
    mode: LaunchMode,
) -> Result<LaunchReport, LaunchError> {
    let web_state = Arc::clone(web_state);
    let task = tokio::spawn(async move {
        let report = web_state.controller.launch(request, &config, mode).await?;
        remember_frequency(&web_state, report.frequency_hz).await;
        Ok::<_, LaunchError>(report)
    });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(LaunchError::Unexpected(e.to_string())),
    }
}

async fn remember_frequency(web_state: &WebState, frequency_hz: u32) {
    if let Err(e) = web_state.store.lock().await.set_frequency(frequency_hz) {
        warn!("Failed to save frequency {}: {}", frequency_hz, e);
    }
}
