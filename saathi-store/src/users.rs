use crate::{from_millis, to_millis, Store};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use saathi_proto::{GroupId, UserId};
use serde::Serialize;

/// A registered person: either a group admin or a member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub mobile_number: String,
    pub age: Option<i64>,
    #[serde(rename = "groupId")]
    pub group_code: Option<GroupId>,
    pub is_admin: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub full_name: String,
    pub mobile_number: String,
    pub age: Option<i64>,
    pub group_code: Option<GroupId>,
    pub is_admin: bool,
}

const USER_COLUMNS: &str =
    "id, full_name, mobile_number, age, group_code, is_admin, is_verified, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        full_name: row.get(1)?,
        mobile_number: row.get(2)?,
        age: row.get(3)?,
        group_code: row.get(4)?,
        is_admin: row.get(5)?,
        is_verified: row.get(6)?,
        created_at: from_millis(row.get(7)?),
    })
}

impl Store {
    /// Create a group and return its code (`GR00001`, `GR00002`, ...).
    ///
    /// The code is derived from the row id inside the same transaction, so
    /// two concurrent creations can never hand out the same code.
    pub fn create_group(&self) -> Result<GroupId> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO groups (created_at) VALUES (?1)",
                params![to_millis(Utc::now())],
            )?;
            let id = tx.last_insert_rowid();
            let code = format!("GR{id:05}");
            tx.execute(
                "UPDATE groups SET group_code = ?1 WHERE id = ?2",
                params![code, id],
            )?;
            tx.commit()?;
            Ok(code)
        })
    }

    pub fn set_group_admin(&self, code: &str, admin_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE groups SET admin_id = ?1 WHERE group_code = ?2",
                params![admin_id, code],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn group_exists(&self, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM groups WHERE group_code = ?1",
                    params![code],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn create_user(&self, user: &NewUser) -> Result<UserId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (full_name, mobile_number, age, group_code, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.full_name,
                    user.mobile_number,
                    user.age,
                    user.group_code,
                    user.is_admin,
                    to_millis(Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn find_user_by_mobile(&self, mobile_number: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE mobile_number = ?1"),
                    params![mobile_number],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    /// The group a user currently belongs to. `None` when the user is
    /// unknown or has no group.
    pub fn find_user_group(&self, id: UserId) -> Result<Option<GroupId>> {
        self.with_conn(|conn| {
            let code: Option<Option<String>> = conn
                .query_row(
                    "SELECT group_code FROM users WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(code.flatten())
        })
    }

    /// Members of a group in registration order.
    pub fn group_members(&self, code: &str, include_admins: bool) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE group_code = ?1 AND (?2 OR is_admin = 0)
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![code, include_admins], user_from_row)?;
            let mut users = Vec::new();
            for user in rows {
                users.push(user?);
            }
            Ok(users)
        })
    }

    pub fn update_user_group(
        &self,
        id: UserId,
        code: Option<&str>,
        is_admin: bool,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE users SET group_code = ?1, is_admin = ?2 WHERE id = ?3",
                params![code, is_admin, id],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn set_otp(&self, id: UserId, otp: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET otp = ?1, otp_expires_at = ?2 WHERE id = ?3",
                params![otp, to_millis(expires_at), id],
            )?;
            Ok(())
        })
    }

    /// Returns the user when `otp` matches and has not expired at `now`.
    pub fn verify_otp(&self, id: UserId, otp: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!(
                        "SELECT {USER_COLUMNS} FROM users
                         WHERE id = ?1 AND otp = ?2 AND otp_expires_at > ?3"
                    ),
                    params![id, otp, to_millis(now)],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn mark_verified(&self, id: UserId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, otp = NULL, otp_expires_at = NULL WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }
}
