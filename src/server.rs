//! HTTP surface: the one screen-assist route plus a health probe.
//!
//! The wire shape stays here; everything behind it works with decoded
//! bytes and plain strings.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::assist::{AssistRequest, AssistService, NO_CODE_GUIDANCE};
use crate::error::AssistError;

/// Shared state behind the router.
pub struct AppState {
    pub assist: AssistService,
}

#[derive(Debug, Deserialize)]
pub struct ScreenAssistInput {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub image_base64_list: Vec<String>,
    /// Single-image form kept for older clients.
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ScreenAssistOutput {
    Analysis { analysis: String },
    Error { error: String },
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/screen-assist", post(screen_assist))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn screen_assist(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ScreenAssistInput>,
) -> Json<ScreenAssistOutput> {
    let mut images = input.image_base64_list;
    if images.is_empty() {
        if let Some(single) = input.image_base64 {
            images.push(single);
        }
    }
    if images.is_empty() {
        return Json(ScreenAssistOutput::Error {
            error: "No images provided.".to_string(),
        });
    }

    // A frame that fails base64 decode is a per-frame decode failure:
    // skipped, never retried, never fatal for the batch.
    let mut frames = Vec::with_capacity(images.len());
    for (index, entry) in images.iter().enumerate() {
        match decode_frame_payload(entry) {
            Ok(bytes) => frames.push(bytes),
            Err(err) => log::warn!("frame {} dropped, bad base64: {}", index, err),
        }
    }

    let request = AssistRequest {
        session_id: input.session_id,
        query: input.query,
        frames,
    };

    match state.assist.handle(request).await {
        Ok(analysis) => Json(ScreenAssistOutput::Analysis { analysis }),
        Err(AssistError::NoTextDetected) => Json(ScreenAssistOutput::Error {
            error: NO_CODE_GUIDANCE.to_string(),
        }),
        Err(err) => Json(ScreenAssistOutput::Error {
            error: err.to_string(),
        }),
    }
}

/// Strip a `data:image/...;base64,` prefix if present and decode.
fn decode_frame_payload(entry: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = entry.rsplit(',').next().unwrap_or(entry);
    base64::engine::general_purpose::STANDARD.decode(payload.trim())
}
