use crate::{from_millis, to_millis, Store};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use saathi_proto::{RosterEntry, UserId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl Store {
    /// Record the latest position for a user.
    ///
    /// Each user has one row. An existing row is updated only when the new
    /// point is not older than the stored one; otherwise a row is inserted.
    /// A point older than what is stored is dropped, and `false` is returned.
    pub fn upsert_location(
        &self,
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let at = to_millis(captured_at);
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE locations SET latitude = ?2, longitude = ?3, captured_at = ?4
                 WHERE user_id = ?1 AND captured_at <= ?4",
                params![user_id, latitude, longitude, at],
            )?;
            if updated > 0 {
                return Ok(true);
            }
            let inserted = conn.execute(
                "INSERT INTO locations (user_id, latitude, longitude, captured_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO NOTHING",
                params![user_id, latitude, longitude, at],
            )?;
            if inserted == 0 {
                log::debug!("ignoring out-of-order location for user {user_id}");
            }
            Ok(inserted > 0)
        })
    }

    pub fn latest_location(&self, user_id: UserId) -> Result<Option<LocationRecord>> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT user_id, latitude, longitude, captured_at
                     FROM locations WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(LocationRecord {
                            user_id: row.get(0)?,
                            latitude: row.get(1)?,
                            longitude: row.get(2)?,
                            captured_at: from_millis(row.get(3)?),
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Latest position of every group member that has one, most recent first.
    pub fn group_roster(&self, code: &str) -> Result<Vec<RosterEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.full_name, u.is_admin, l.latitude, l.longitude, l.captured_at
                 FROM users u
                 JOIN locations l ON l.user_id = u.id
                 WHERE u.group_code = ?1
                 ORDER BY l.captured_at DESC, u.id ASC",
            )?;
            let rows = stmt.query_map(params![code], |row| {
                Ok(RosterEntry {
                    user_id: row.get(0)?,
                    full_name: row.get(1)?,
                    is_admin: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                    captured_at: from_millis(row.get(5)?),
                })
            })?;

            let mut roster = Vec::new();
            for entry in rows {
                roster.push(entry?);
            }
            Ok(roster)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewUser;
    use chrono::Duration;
    use k9::assert_equal;

    fn member(store: &Store, name: &str, mobile: &str, group: &str) -> UserId {
        store
            .create_user(&NewUser {
                full_name: name.to_string(),
                mobile_number: mobile.to_string(),
                age: None,
                group_code: Some(group.to_string()),
                is_admin: false,
            })
            .unwrap()
    }

    #[test]
    fn upsert_keeps_one_row_per_user() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let a = member(&store, "Asha", "9000000001", &group);
        let t0 = Utc::now();

        assert!(store.upsert_location(a, 22.71, 75.85, t0).unwrap());
        assert!(store
            .upsert_location(a, 22.72, 75.86, t0 + Duration::seconds(5))
            .unwrap());

        let latest = store.latest_location(a).unwrap().unwrap();
        assert_equal!(latest.latitude, 22.72);
        assert_equal!(store.group_roster(&group).unwrap().len(), 1);
    }

    #[test]
    fn stale_point_does_not_overwrite_newer_one() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let a = member(&store, "Asha", "9000000001", &group);
        let t0 = Utc::now();

        store
            .upsert_location(a, 22.72, 75.86, t0 + Duration::seconds(5))
            .unwrap();
        assert!(!store.upsert_location(a, 1.0, 1.0, t0).unwrap());

        let latest = store.latest_location(a).unwrap().unwrap();
        assert_equal!(latest.latitude, 22.72);
        assert_equal!(latest.longitude, 75.86);
    }

    #[test]
    fn roster_is_group_scoped_and_most_recent_first() {
        let store = Store::in_memory().unwrap();
        let g1 = store.create_group().unwrap();
        let g2 = store.create_group().unwrap();
        let a = member(&store, "Asha", "9000000001", &g1);
        let b = member(&store, "Bala", "9000000002", &g1);
        let idle = member(&store, "Idle", "9000000003", &g1);
        let c = member(&store, "Chandra", "9000000004", &g2);
        let t0 = Utc::now();

        store.upsert_location(a, 22.71, 75.85, t0).unwrap();
        store
            .upsert_location(b, 22.70, 75.84, t0 + Duration::seconds(1))
            .unwrap();
        store.upsert_location(c, 19.07, 72.87, t0).unwrap();

        let roster = store.group_roster(&g1).unwrap();
        let ids: Vec<UserId> = roster.iter().map(|e| e.user_id).collect();
        assert_equal!(ids, vec![b, a]);
        assert!(!ids.contains(&idle));
        assert_equal!(roster[1].full_name.as_deref(), Some("Asha"));
    }

    #[test]
    fn zero_is_a_valid_coordinate() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let a = member(&store, "Asha", "9000000001", &group);
        store.upsert_location(a, 0.0, 0.0, Utc::now()).unwrap();
        assert_equal!(store.group_roster(&group).unwrap()[0].latitude, 0.0);
    }

    #[test]
    fn unknown_user_is_a_persistence_error() {
        let store = Store::in_memory().unwrap();
        assert!(store.upsert_location(4242, 1.0, 1.0, Utc::now()).is_err());
    }
}
