use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::screening::{
    Classification, RegionLabel, RiskLevel, Screener, ScreeningError, ScreeningReport, UrgencyLevel,
};

/// Uploads larger than this are rejected before reaching the pipeline.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Multipart field names accepted for the X-ray, in order of preference.
const UPLOAD_FIELDS: [&str; 2] = ["image", "file"];

/// Shared by all requests. The screener serializes model access itself.
#[derive(Debug, Clone)]
pub struct AppState {
    screener: Option<Arc<Screener>>,
    device: String,
}

impl AppState {
    pub fn new(screener: Arc<Screener>) -> Self {
        let device = screener.device().to_string();
        Self {
            screener: Some(screener),
            device,
        }
    }

    /// A service that answers health checks but has no model to screen with.
    pub fn without_model(device: impl Into<String>) -> Self {
        Self {
            screener: None,
            device: device.into(),
        }
    }
}

/// JSON body returned by `POST /predict`.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub probability: f32,
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
    pub confidence: f32,
    pub timestamp: String,
    /// Overlay PNG, base64
    pub heatmap: Option<String>,
    /// False-color saliency PNG, base64
    pub heatmap_only: Option<String>,
    pub device_used: String,
    pub classification: Classification,
    pub urgency_level: UrgencyLevel,
    pub recommendations: Vec<&'static str>,
    pub affected_regions: Vec<RegionLabel>,
    pub heatmap_explanation: String,
}

impl PredictResponse {
    pub fn from_report(report: &ScreeningReport) -> Result<Self, ScreeningError> {
        let (heatmap, heatmap_only) = match &report.heatmap {
            Some(outputs) => (
                Some(encode_png_base64(&outputs.overlay_image)?),
                Some(encode_png_base64(&outputs.saliency_image)?),
            ),
            None => (None, None),
        };

        Ok(Self {
            probability: report.probability,
            risk_level: report.assessment.risk_level,
            confidence: report.assessment.confidence,
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            heatmap,
            heatmap_only,
            device_used: report.device.clone(),
            classification: report.assessment.classification,
            urgency_level: report.urgency,
            recommendations: report.recommendations().to_vec(),
            affected_regions: report.affected_regions.clone(),
            heatmap_explanation: report.heatmap_explanation.clone(),
        })
    }
}

/// PNG-encodes an RGB image and returns it as standard base64 text.
pub fn encode_png_base64(image: &RgbImage) -> Result<String, ScreeningError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ScreeningError> for ApiError {
    fn from(e: ScreeningError) -> Self {
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Binds `addr` and serves until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": state.screener.is_some(),
        "device": state.device,
    }))
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let bytes = read_upload(multipart).await?;
    let screener = state
        .screener
        .clone()
        .ok_or_else(|| ApiError::internal("Model not loaded"))?;

    info!("Screening upload of {} bytes", bytes.len());
    let report = tokio::task::spawn_blocking(move || screener.screen_bytes(&bytes))
        .await
        .map_err(|e| ApiError::internal(format!("Screening task failed: {}", e)))??;

    Ok(Json(PredictResponse::from_report(&report)?))
}

/// Returns the bytes of the first accepted upload field, preferring `image`.
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    let mut found: [Option<Vec<u8>>; 2] = [None, None];
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let slot = match field.name().and_then(|name| UPLOAD_FIELDS.iter().position(|f| *f == name)) {
            Some(slot) => slot,
            None => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        found[slot].get_or_insert_with(|| data.to_vec());
    }

    let [image, file] = found;
    image
        .or(file)
        .ok_or_else(|| ApiError::bad_request("No image file provided"))
}
