//! HTTP surface over the pipeline controller

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{error, info};

use crate::pipeline::{PipelineController, PipelineError, PipelineStatus, ResultStatus};

pub type ApiState = Arc<PipelineController>;

pub fn create_router(controller: ApiState) -> Router {
    Router::new()
        .route("/toggle", post(toggle_handler))
        .route("/process-frame", post(process_frame_handler))
        .route("/change-variant", post(change_variant_handler))
        .route("/status", get(status_handler))
        .route("/reset", post(reset_handler))
        .with_state(controller)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

/// Pipeline errors rendered as `{status: "error", message}` with a matching
/// HTTP status code
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            err if err.is_state_error() => StatusCode::CONFLICT,
            PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
        }

        let body = Json(ErrorResponse {
            status: "error",
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub status: &'static str,
    pub enabled: bool,
    pub message: String,
}

async fn toggle_handler(State(controller): State<ApiState>) -> Result<Json<ToggleResponse>, ApiError> {
    if controller.is_running() {
        let stopped = controller.stop().await?;
        let message = match stopped.timeout_warning() {
            Some(warning) => format!("pipeline stopped, {warning}"),
            None => "pipeline stopped".to_string(),
        };

        Ok(Json(ToggleResponse {
            status: "success",
            enabled: false,
            message,
        }))
    } else {
        let started = controller.start()?;
        info!(run = started.run, "pipeline enabled over HTTP");

        Ok(Json(ToggleResponse {
            status: "success",
            enabled: true,
            message: "pipeline started".to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessFrameRequest {
    /// Base64 image, optionally as a `data:image/...;base64,` URL
    pub frame: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessFrameResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<&'static str>,
    /// Sequence number of the frame the result was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Queue the submitted frame and answer with whatever result is ready
async fn process_frame_handler(
    State(controller): State<ApiState>,
    Json(request): Json<ProcessFrameRequest>,
) -> Result<Json<ProcessFrameResponse>, ApiError> {
    // base64 + image decode stays off the async workers
    let submitter = controller.clone();
    task::spawn_blocking(move || submitter.submit_frame(&request.frame))
        .await
        .map_err(|e| PipelineError::Unavailable(format!("frame decode task failed: {e}")))??;

    let response = match controller.poll_result() {
        ResultStatus::Ready(result) => ProcessFrameResponse {
            status: "success",
            result: Some(result.payload.clone()),
            variant: Some(result.variant.name()),
            source_sequence: Some(result.source_sequence),
            ..Default::default()
        },
        ResultStatus::Processing => ProcessFrameResponse {
            status: "processing",
            message: Some("frame is being processed".to_string()),
            ..Default::default()
        },
        // Stopped between submit and poll
        ResultStatus::NotRunning => return Err(PipelineError::NotRunning.into()),
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub status: &'static str,
    pub variant: &'static str,
    pub index: usize,
}

async fn change_variant_handler(State(controller): State<ApiState>) -> Json<VariantResponse> {
    let change = controller.next_variant();
    Json(VariantResponse {
        status: "success",
        variant: change.variant.name(),
        index: change.index,
    })
}

async fn status_handler(State(controller): State<ApiState>) -> Json<PipelineStatus> {
    Json(controller.status())
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub message: &'static str,
}

async fn reset_handler(State(controller): State<ApiState>) -> Result<Json<ResetResponse>, ApiError> {
    controller.reset()?;
    info!("pipeline reset over HTTP");

    Ok(Json(ResetResponse {
        status: "success",
        message: "pipeline reset",
    }))
}
