use axum::extract::{Json, Path, State};
use chrono::Utc;
use saathi_store::QrMember;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::response::{ok, ApiResult};
use crate::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Saathi API is running",
        "timestamp": Utc::now(),
    }))
}

/// Emergency profile behind a scanned tag. `id` is the tag id printed in the
/// QR URL.
pub async fn member_details(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<QrMember> {
    let member = state
        .db(move |store| store.scan_qr(id))
        .await?
        .and_then(|scan| scan.member)
        .ok_or_else(|| ApiError::not_found("Member not found"))?;
    ok("Member details", member)
}
