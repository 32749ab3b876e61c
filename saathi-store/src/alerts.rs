use crate::{from_millis, to_millis, Store};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use saathi_proto::{GroupId, UserId};
use serde::Serialize;

pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// An SOS raised by a group member, joined with who raised it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SosAlert {
    pub id: i64,
    pub user_id: UserId,
    #[serde(rename = "groupId")]
    pub group_code: GroupId,
    pub full_name: String,
    pub mobile_number: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn create_alert(&self, user_id: UserId, code: &str, at: DateTime<Utc>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sos_alerts (user_id, group_code, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, code, to_millis(at)],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest alerts for a group.
    pub fn alerts_for_group(&self, code: &str, limit: usize) -> Result<Vec<SosAlert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.user_id, a.group_code, u.full_name, u.mobile_number, a.created_at
                 FROM sos_alerts a
                 JOIN users u ON u.id = a.user_id
                 WHERE a.group_code = ?1
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![code, limit as i64], |row| {
                Ok(SosAlert {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    group_code: row.get(2)?,
                    full_name: row.get(3)?,
                    mobile_number: row.get(4)?,
                    created_at: from_millis(row.get(5)?),
                })
            })?;

            let mut alerts = Vec::new();
            for alert in rows {
                alerts.push(alert?);
            }
            Ok(alerts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewUser;
    use chrono::Duration;
    use k9::assert_equal;

    #[test]
    fn alerts_are_newest_first_and_limited() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let other = store.create_group().unwrap();
        let user = store
            .create_user(&NewUser {
                full_name: "Asha".to_string(),
                mobile_number: "9000000001".to_string(),
                group_code: Some(group.clone()),
                ..Default::default()
            })
            .unwrap();

        let t0 = Utc::now();
        let first = store.create_alert(user, &group, t0).unwrap();
        let second = store
            .create_alert(user, &group, t0 + Duration::seconds(1))
            .unwrap();
        store
            .create_alert(user, &group, t0 + Duration::seconds(2))
            .unwrap();

        let alerts = store.alerts_for_group(&group, 2).unwrap();
        assert_equal!(alerts.len(), 2);
        assert!(alerts[0].id > second);
        assert_equal!(alerts[1].id, second);
        assert_equal!(alerts[1].mobile_number, "9000000001");
        assert!(store
            .alerts_for_group(&group, DEFAULT_ALERT_LIMIT)
            .unwrap()
            .iter()
            .any(|a| a.id == first));
        assert!(store.alerts_for_group(&other, 10).unwrap().is_empty());
    }

    #[test]
    fn alert_for_unknown_group_is_rejected() {
        let store = Store::in_memory().unwrap();
        let user = store
            .create_user(&NewUser {
                full_name: "Asha".to_string(),
                mobile_number: "9000000001".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.create_alert(user, "GR99999", Utc::now()).is_err());
    }
}
