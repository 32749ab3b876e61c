use axum::extract::{Json, Query, State};
use chrono::{SubsecRound, Utc};
use saathi_proto::{LocationPayload, RosterEntry};
use saathi_store::LocationRecord;
use serde::Deserialize;

use super::{required, require_group};
use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::response::{ok, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    #[serde(default)]
    group_id: String,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<LocationPayload>,
) -> ApiResult<LocationRecord> {
    let (latitude, longitude) = payload
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let record = LocationRecord {
        user_id: user.user_id,
        latitude,
        longitude,
        captured_at: Utc::now().trunc_subsecs(3),
    };
    let at = record.captured_at;
    let written = state
        .db(move |store| store.upsert_location(user.user_id, latitude, longitude, at))
        .await?;
    if !written {
        return Err(ApiError::conflict("A newer location is already recorded"));
    }
    ok("Location updated successfully", record)
}

pub async fn latest(State(state): State<AppState>, user: AuthUser) -> ApiResult<LocationRecord> {
    let record = state
        .db(move |store| store.latest_location(user.user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("No location recorded yet"))?;
    ok("Latest location", record)
}

/// Roster for a group the caller belongs to.
pub async fn group(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Vec<RosterEntry>> {
    let group_id = required(&query.group_id, "groupId")?;
    require_group(&state, user.user_id, &group_id).await?;
    let roster = state
        .db(move |store| store.group_roster(&group_id))
        .await?;
    ok("Group locations", roster)
}
