use axum::extract::{Json, State};
use chrono::Utc;
use saathi_proto::{GroupId, UserId};
use saathi_store::{NewUser, User};
use serde::{Deserialize, Serialize};

use super::{required, token_for, valid_age, valid_mobile};
use crate::error::ApiError;
use crate::otp::{deliver_otp, generate_otp, otp_ttl};
use crate::response::{ok, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    mobile_number: String,
    #[serde(default)]
    age: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMember {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    mobile_number: String,
    #[serde(default)]
    age: Option<i64>,
    #[serde(default)]
    group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    #[serde(default)]
    mobile_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtp {
    user_id: UserId,
    #[serde(default)]
    otp: String,
    #[serde(default)]
    user_type: UserType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    user_id: UserId,
    group_id: GroupId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredMember {
    member_id: UserId,
    group_id: GroupId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLogin {
    token: String,
    user: User,
    group_members: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct MemberLogin {
    token: String,
    member: User,
}

#[derive(Debug, Serialize)]
pub struct Verified {
    token: String,
    user: User,
}

/// Register a group admin. A fresh group is created for them.
pub async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterUser>,
) -> ApiResult<RegisteredUser> {
    let full_name = required(&req.full_name, "fullName")?;
    let mobile = valid_mobile(&req.mobile_number)?;
    let age = valid_age(req.age)?;
    let otp = generate_otp(state.config.fixed_otp.as_deref());

    let (user_id, group_id) = {
        let mobile = mobile.clone();
        let otp = otp.clone();
        state
            .db(move |store| {
                if store.find_user_by_mobile(&mobile)?.is_some() {
                    return Ok(None);
                }
                let group = store.create_group()?;
                let id = store.create_user(&NewUser {
                    full_name,
                    mobile_number: mobile,
                    age,
                    group_code: Some(group.clone()),
                    is_admin: true,
                })?;
                store.set_group_admin(&group, id)?;
                store.set_otp(id, &otp, Utc::now() + otp_ttl())?;
                Ok(Some((id, group)))
            })
            .await?
            .ok_or_else(|| ApiError::conflict("User already exists with this mobile number"))?
    };

    deliver_otp(&mobile, &otp);
    log::info!("registered admin {user_id} with new group {group_id}");
    ok(
        "User registered successfully. OTP sent to mobile number.",
        RegisteredUser { user_id, group_id },
    )
}

/// Register a member into an existing group.
pub async fn register_member(
    State(state): State<AppState>,
    Json(req): Json<RegisterMember>,
) -> ApiResult<RegisteredMember> {
    let full_name = required(&req.full_name, "fullName")?;
    let mobile = valid_mobile(&req.mobile_number)?;
    let age = valid_age(req.age)?;
    let group_id = required(&req.group_id, "groupId")?;
    let otp = generate_otp(state.config.fixed_otp.as_deref());

    let member_id = {
        let mobile = mobile.clone();
        let otp = otp.clone();
        let group = group_id.clone();
        state
            .db(move |store| {
                if !store.group_exists(&group)? {
                    return Ok(Err(ApiError::validation("Invalid group ID")));
                }
                if store.find_user_by_mobile(&mobile)?.is_some() {
                    return Ok(Err(ApiError::conflict(
                        "Member already exists with this mobile number",
                    )));
                }
                let id = store.create_user(&NewUser {
                    full_name,
                    mobile_number: mobile,
                    age,
                    group_code: Some(group),
                    is_admin: false,
                })?;
                store.set_otp(id, &otp, Utc::now() + otp_ttl())?;
                Ok(Ok(id))
            })
            .await??
    };

    deliver_otp(&mobile, &otp);
    log::info!("registered member {member_id} into group {group_id}");
    ok(
        "Member registered successfully. OTP sent to mobile number.",
        RegisteredMember {
            member_id,
            group_id,
        },
    )
}

pub async fn login_user(
    State(state): State<AppState>,
    Json(req): Json<Login>,
) -> ApiResult<AdminLogin> {
    let mobile = valid_mobile(&req.mobile_number)?;
    let user = state
        .db(move |store| store.find_user_by_mobile(&mobile))
        .await?
        .filter(|user| user.is_admin)
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if !user.is_verified {
        return Err(ApiError::validation(
            "User not verified. Please verify OTP first.",
        ));
    }

    let group_members = match user.group_code.clone() {
        Some(code) => {
            state
                .db(move |store| store.group_members(&code, false))
                .await?
        }
        None => Vec::new(),
    };
    let token = token_for(&state, user.id, true)?;
    ok(
        "Login successful",
        AdminLogin {
            token,
            user,
            group_members,
        },
    )
}

pub async fn login_member(
    State(state): State<AppState>,
    Json(req): Json<Login>,
) -> ApiResult<MemberLogin> {
    let mobile = valid_mobile(&req.mobile_number)?;
    let member = state
        .db(move |store| store.find_user_by_mobile(&mobile))
        .await?
        .filter(|user| !user.is_admin)
        .ok_or_else(|| ApiError::not_found("Member not found"))?;
    if !member.is_verified {
        return Err(ApiError::validation(
            "Member not verified. Please verify OTP first.",
        ));
    }

    let token = token_for(&state, member.id, false)?;
    ok("Login successful", MemberLogin { token, member })
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtp>,
) -> ApiResult<Verified> {
    let otp = required(&req.otp, "otp")?;
    let user_id = req.user_id;
    let user = state
        .db(move |store| store.verify_otp(user_id, &otp, Utc::now()))
        .await?
        .ok_or_else(|| ApiError::validation("Invalid or expired OTP"))?;

    let as_admin = req.user_type == UserType::Admin;
    if as_admin != user.is_admin {
        return Err(ApiError::forbidden("User type does not match this account"));
    }

    state.db(move |store| store.mark_verified(user_id)).await?;
    let token = token_for(&state, user.id, as_admin)?;
    let user = User {
        is_verified: true,
        ..user
    };
    ok("OTP verified successfully", Verified { token, user })
}
