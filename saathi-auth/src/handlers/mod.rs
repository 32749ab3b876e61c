pub mod auth;
pub mod location;
pub mod public;
pub mod qr;
pub mod sos;

use saathi_proto::{GroupId, UserId};

use crate::error::ApiError;
use crate::token::issue_token;
use crate::AppState;

fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn valid_mobile(value: &str) -> Result<String, ApiError> {
    let mobile = required(value, "mobileNumber")?;
    if !(10..=15).contains(&mobile.len()) || !mobile.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation("Invalid mobile number"));
    }
    Ok(mobile)
}

fn valid_age(age: Option<i64>) -> Result<Option<i64>, ApiError> {
    match age {
        Some(age) if !(0..=150).contains(&age) => Err(ApiError::validation("Invalid age")),
        age => Ok(age),
    }
}

fn token_for(state: &AppState, user_id: UserId, is_admin: bool) -> Result<String, ApiError> {
    issue_token(&state.config.jwt_secret, user_id, is_admin).map_err(|e| ApiError::Store(e.into()))
}

/// The caller's current group, straight from the store.
async fn caller_group(state: &AppState, user_id: UserId) -> Result<GroupId, ApiError> {
    state
        .db(move |store| store.find_user_group(user_id))
        .await?
        .ok_or_else(|| ApiError::validation("User not found or not in a group"))
}

/// Reject callers asking about a group they do not belong to.
async fn require_group(state: &AppState, user_id: UserId, group: &str) -> Result<(), ApiError> {
    if caller_group(state, user_id).await? != group {
        return Err(ApiError::forbidden("Not a member of this group"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn mobile_validation() {
        assert_equal!(valid_mobile(" 9876543210 ").unwrap(), "9876543210");
        assert!(valid_mobile("12345").is_err());
        assert!(valid_mobile("98765abc10").is_err());
        assert!(valid_mobile("").is_err());
    }

    #[test]
    fn age_validation() {
        assert_equal!(valid_age(None).unwrap(), None);
        assert_equal!(valid_age(Some(70)).unwrap(), Some(70));
        assert!(valid_age(Some(-1)).is_err());
        assert!(valid_age(Some(200)).is_err());
    }
}
