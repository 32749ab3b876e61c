use axum::extract::{Json, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use saathi_store::{render_qr_sheet, render_qr_svg, BindQr, QrListing, QrScan, QrStats, SheetEntry};
use serde::{Deserialize, Serialize};

use super::required;
use crate::error::ApiError;
use crate::extract::{AdminUser, AuthUser};
use crate::response::{ok, ApiResult};
use crate::AppState;

pub const MAX_BULK: usize = 10_000;
pub const DEFAULT_BULK: usize = 1_000;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_SEARCH_RESULTS: usize = 50;
pub const DEFAULT_SEARCH_RESULTS: usize = 20;
pub const MAX_SHEET_QUANTITY: usize = 1_000;
pub const DEFAULT_SHEET_QUANTITY: usize = 6;
const DEFAULT_IMAGE_SIZE: u32 = 200;

const SVG: &str = "image/svg+xml";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generated {
    qr_id: i64,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkGenerate {
    count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkGenerated {
    count: usize,
    first_id: Option<i64>,
    last_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bound {
    qr_id: i64,
    member_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    page: usize,
    limit: usize,
    has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct QrPage {
    qrs: Vec<QrListing>,
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SheetRequest {
    quantity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    size: Option<u32>,
}

pub async fn generate(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Generated> {
    let qr_id = state.db(|store| store.create_qr()).await?;
    ok(
        "QR code generated successfully",
        Generated {
            qr_id,
            url: state.config.member_url(qr_id),
        },
    )
}

pub async fn bulk_generate(
    State(state): State<AppState>,
    _admin: AdminUser,
    body: Option<Json<BulkGenerate>>,
) -> ApiResult<BulkGenerated> {
    let count = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .count
        .unwrap_or(DEFAULT_BULK);
    if count == 0 || count > MAX_BULK {
        return Err(ApiError::validation(
            "Count must be between 1 and 10,000 QRs per request",
        ));
    }

    let ids = state.db(move |store| store.bulk_create_qr(count)).await?;
    log::info!("bulk generated {} QR codes", ids.len());
    ok(
        format!("{} QR codes generated successfully", ids.len()),
        BulkGenerated {
            count: ids.len(),
            first_id: ids.first().copied(),
            last_id: ids.last().copied(),
        },
    )
}

/// Attach an emergency profile to an unbound tag.
pub async fn bind(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(req): Json<BindQr>,
) -> ApiResult<Bound> {
    let req = BindQr {
        group_code: required(&req.group_code, "groupId")?,
        full_name: required(&req.full_name, "fullName")?,
        emergency_contact: required(&req.emergency_contact, "emergencyContact")?,
        ..req
    };
    if !(0..=150).contains(&req.age) {
        return Err(ApiError::validation("Invalid age"));
    }

    let qr_id = req.qr_id;
    let member_id = state
        .db(move |store| {
            if !store.group_exists(&req.group_code)? {
                return Ok(Err(ApiError::not_found("Group not found")));
            }
            match store.find_qr(req.qr_id)? {
                None => return Ok(Err(ApiError::not_found("QR code not found"))),
                Some(tag) if tag.is_bound() => {
                    return Ok(Err(ApiError::conflict("QR code is already bound to a user")))
                }
                Some(_) => {}
            }
            // Someone else may still win the claim between the check and the bind.
            Ok(store
                .bind_qr(&req)?
                .ok_or_else(|| ApiError::conflict("QR code is already bound to a user")))
        })
        .await??;

    log::info!("bound QR {qr_id} to member profile {member_id}");
    ok(
        "User bound to QR code successfully",
        Bound { qr_id, member_id },
    )
}

pub async fn scan(State(state): State<AppState>, Path(qr_id): Path<i64>) -> ApiResult<QrScan> {
    let scan = state
        .db(move |store| store.scan_qr(qr_id))
        .await?
        .ok_or_else(|| ApiError::not_found("QR code not found"))?;
    let message = if scan.is_bound {
        "User details retrieved successfully"
    } else {
        "QR code is not bound to any user"
    };
    ok(message, scan)
}

pub async fn list(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<QrPage> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let qrs = state.db(move |store| store.list_qr(page, limit)).await?;
    let has_more = qrs.len() == limit;
    ok(
        "QR codes retrieved successfully",
        QrPage {
            qrs,
            pagination: Pagination {
                page,
                limit,
                has_more,
            },
        },
    )
}

pub async fn search(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<QrListing>> {
    let term = query.q.trim().to_string();
    if term.chars().count() < 2 {
        return Err(ApiError::validation(
            "Search term must be at least 2 characters",
        ));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);
    let qrs = state.db(move |store| store.search_qr(&term, limit)).await?;
    ok("QR search completed", qrs)
}

pub async fn unbind(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(qr_id): Path<i64>,
) -> ApiResult<i64> {
    state
        .db(move |store| {
            match store.find_qr(qr_id)? {
                None => return Ok(Err(ApiError::not_found("QR code not found"))),
                Some(tag) if !tag.is_bound() => {
                    return Ok(Err(ApiError::validation("QR code is not bound to any user")))
                }
                Some(_) => {}
            }
            if store.unbind_qr(qr_id)? {
                Ok(Ok(()))
            } else {
                Ok(Err(ApiError::validation("QR code is not bound to any user")))
            }
        })
        .await??;
    ok("User unbound from QR code successfully", qr_id)
}

pub async fn stats(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<QrStats> {
    let stats = state.db(|store| store.qr_stats(Utc::now())).await?;
    ok("QR statistics retrieved successfully", stats)
}

/// Create fresh tags and return them as a printable SVG sheet.
pub async fn generate_sheet(
    State(state): State<AppState>,
    _user: AuthUser,
    body: Option<Json<SheetRequest>>,
) -> Result<Response, ApiError> {
    let quantity = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .quantity
        .unwrap_or(DEFAULT_SHEET_QUANTITY);
    if quantity == 0 || quantity > MAX_SHEET_QUANTITY {
        return Err(ApiError::validation("Quantity must be between 1 and 1000"));
    }

    let config = state.config.clone();
    let now = Utc::now();
    let sheet = state
        .db(move |store| {
            let entries: Vec<SheetEntry> = store
                .bulk_create_qr(quantity)?
                .into_iter()
                .map(|qr_id| SheetEntry {
                    qr_id,
                    url: config.member_url(qr_id),
                })
                .collect();
            render_qr_sheet(&entries, now)
        })
        .await?;

    let filename = format!(
        "attachment; filename=\"qr-codes-{}.svg\"",
        now.format("%Y-%m-%d")
    );
    Ok(([(CONTENT_TYPE, SVG.to_string()), (CONTENT_DISPOSITION, filename)], sheet).into_response())
}

pub async fn image(
    State(state): State<AppState>,
    Path(qr_id): Path<i64>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    let size = query.size.unwrap_or(DEFAULT_IMAGE_SIZE).clamp(64, 2048);
    let url = state.config.member_url(qr_id);
    let svg = state
        .db(move |store| {
            if store.find_qr(qr_id)?.is_none() {
                return Ok(None);
            }
            render_qr_svg(&url, size).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("QR code not found"))?;
    Ok(([(CONTENT_TYPE, SVG)], svg).into_response())
}
