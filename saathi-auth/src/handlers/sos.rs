use axum::extract::{Json, State};
use chrono::{DateTime, Utc};
use saathi_proto::{GroupId, UserId};
use saathi_store::{SosAlert, DEFAULT_ALERT_LIMIT};
use serde::{Deserialize, Serialize};

use super::{caller_group, required, require_group};
use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::response::{ok, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAlert {
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAlerts {
    #[serde(default)]
    group_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSent {
    alert_id: i64,
    user_id: UserId,
    group_id: GroupId,
    created_at: DateTime<Utc>,
}

/// Raise an SOS for the caller's group. The body may be omitted.
pub async fn send_alert(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<SendAlert>>,
) -> ApiResult<AlertSent> {
    let requested = body.map(|Json(b)| b).unwrap_or_default().group_id;
    let group_id = caller_group(&state, user.user_id).await?;
    if let Some(requested) = requested.filter(|g| !g.trim().is_empty()) {
        if requested.trim() != group_id {
            return Err(ApiError::forbidden("Not a member of this group"));
        }
    }

    let created_at = Utc::now();
    let alert_id = {
        let group = group_id.clone();
        state
            .db(move |store| store.create_alert(user.user_id, &group, created_at))
            .await?
    };
    log::warn!(
        "SOS {alert_id} raised by user {} in group {group_id}",
        user.user_id
    );
    ok(
        "SOS alert sent",
        AlertSent {
            alert_id,
            user_id: user.user_id,
            group_id,
            created_at,
        },
    )
}

pub async fn get_alerts(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<GetAlerts>,
) -> ApiResult<Vec<SosAlert>> {
    let group_id = required(&req.group_id, "groupId")?;
    require_group(&state, user.user_id, &group_id).await?;
    let alerts = state
        .db(move |store| store.alerts_for_group(&group_id, DEFAULT_ALERT_LIMIT))
        .await?;
    ok("Alerts fetched", alerts)
}
