use axum::Json;
use serde::Serialize;

use crate::error::ApiError;

/// Envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    }))
}

pub fn ok_message(message: impl Into<String>) -> ApiResult<()> {
    Ok(Json(ApiResponse {
        success: true,
        message: message.into(),
        data: None,
    }))
}
