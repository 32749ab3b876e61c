use crate::{from_millis, to_millis, Store};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use saathi_proto::GroupId;
use serde::{Deserialize, Serialize};

/// A printable tag. Unbound until a member profile is attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrTag {
    pub id: i64,
    pub member_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl QrTag {
    pub fn is_bound(&self) -> bool {
        self.member_id.is_some()
    }
}

/// Emergency profile of someone wearing a tag, usually without a phone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrMember {
    pub id: i64,
    #[serde(rename = "groupId")]
    pub group_code: GroupId,
    pub full_name: String,
    pub age: i64,
    pub emergency_contact: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindQr {
    pub qr_id: i64,
    #[serde(rename = "groupId")]
    pub group_code: GroupId,
    pub full_name: String,
    pub age: i64,
    pub emergency_contact: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrScan {
    pub qr_id: i64,
    pub is_bound: bool,
    pub created_at: DateTime<Utc>,
    pub member: Option<QrMember>,
}

/// One row of the admin listing and search views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrListing {
    pub id: i64,
    pub member_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub full_name: Option<String>,
    pub emergency_contact: Option<String>,
    #[serde(rename = "groupId")]
    pub group_code: Option<GroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QrStats {
    pub total: i64,
    pub bound: i64,
    pub unbound: i64,
    pub recent: i64,
}

const MEMBER_COLUMNS: &str =
    "id, group_code, full_name, age, emergency_contact, address, created_at";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<QrMember> {
    Ok(QrMember {
        id: row.get(0)?,
        group_code: row.get(1)?,
        full_name: row.get(2)?,
        age: row.get(3)?,
        emergency_contact: row.get(4)?,
        address: row.get(5)?,
        created_at: from_millis(row.get(6)?),
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<QrListing> {
    Ok(QrListing {
        id: row.get(0)?,
        member_id: row.get(1)?,
        created_at: from_millis(row.get(2)?),
        full_name: row.get(3)?,
        emergency_contact: row.get(4)?,
        group_code: row.get(5)?,
    })
}

const LISTING_QUERY: &str = "SELECT q.id, q.member_id, q.created_at, m.full_name, m.emergency_contact, m.group_code
     FROM qr_codes q
     LEFT JOIN qr_members m ON m.id = q.member_id";

fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Store {
    pub fn create_qr(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO qr_codes (created_at) VALUES (?1)",
                params![to_millis(Utc::now())],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Create `count` unbound tags in one transaction and return their ids.
    pub fn bulk_create_qr(&self, count: usize) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(count);
            {
                let now = to_millis(Utc::now());
                let mut stmt = tx.prepare("INSERT INTO qr_codes (created_at) VALUES (?1)")?;
                for _ in 0..count {
                    stmt.execute(params![now])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;
            Ok(ids)
        })
    }

    pub fn find_qr(&self, id: i64) -> Result<Option<QrTag>> {
        self.with_conn(|conn| {
            let tag = conn
                .query_row(
                    "SELECT id, member_id, created_at FROM qr_codes WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(QrTag {
                            id: row.get(0)?,
                            member_id: row.get(1)?,
                            created_at: from_millis(row.get(2)?),
                        })
                    },
                )
                .optional()?;
            Ok(tag)
        })
    }

    /// Attach a new member profile to an unbound tag.
    ///
    /// Returns the member id, or `None` when the tag does not exist or is
    /// already bound. In that case nothing is written.
    pub fn bind_qr(&self, bind: &BindQr) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO qr_members (group_code, full_name, age, emergency_contact, address, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    bind.group_code,
                    bind.full_name,
                    bind.age,
                    bind.emergency_contact,
                    bind.address,
                    to_millis(Utc::now()),
                ],
            )?;
            let member_id = tx.last_insert_rowid();

            let claimed = tx.execute(
                "UPDATE qr_codes SET member_id = ?1 WHERE id = ?2 AND member_id IS NULL",
                params![member_id, bind.qr_id],
            )?;
            if claimed == 0 {
                // Dropping the transaction rolls back the member insert.
                return Ok(None);
            }
            tx.commit()?;
            Ok(Some(member_id))
        })
    }

    /// Detach the member from a tag. Returns false when the tag was not bound.
    /// The member profile itself is kept.
    pub fn unbind_qr(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE qr_codes SET member_id = NULL WHERE id = ?1 AND member_id IS NOT NULL",
                params![id],
            )?;
            Ok(rows > 0)
        })
    }

    pub fn scan_qr(&self, id: i64) -> Result<Option<QrScan>> {
        let Some(tag) = self.find_qr(id)? else {
            return Ok(None);
        };
        let member = match tag.member_id {
            Some(member_id) => self.find_qr_member(member_id)?,
            None => None,
        };
        Ok(Some(QrScan {
            qr_id: tag.id,
            is_bound: tag.is_bound(),
            created_at: tag.created_at,
            member,
        }))
    }

    /// Newest tags first. `page` starts at 1.
    pub fn list_qr(&self, page: usize, limit: usize) -> Result<Vec<QrListing>> {
        let offset = page.saturating_sub(1) * limit;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_QUERY} ORDER BY q.created_at DESC, q.id DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], listing_from_row)?;
            let mut listings = Vec::new();
            for listing in rows {
                listings.push(listing?);
            }
            Ok(listings)
        })
    }

    /// Match a term against the tag id, member name or emergency contact.
    pub fn search_qr(&self, term: &str, limit: usize) -> Result<Vec<QrListing>> {
        let pattern = like_pattern(term);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_QUERY}
                 WHERE CAST(q.id AS TEXT) LIKE ?1 ESCAPE '\\'
                    OR m.full_name LIKE ?1 ESCAPE '\\'
                    OR m.emergency_contact LIKE ?1 ESCAPE '\\'
                 ORDER BY q.created_at DESC, q.id DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![pattern, limit as i64], listing_from_row)?;
            let mut listings = Vec::new();
            for listing in rows {
                listings.push(listing?);
            }
            Ok(listings)
        })
    }

    /// Totals, plus how many tags were created in the 24 hours before `now`.
    pub fn qr_stats(&self, now: DateTime<Utc>) -> Result<QrStats> {
        let since = to_millis(now - Duration::hours(24));
        self.with_conn(|conn| {
            let (total, bound, recent) = conn.query_row(
                "SELECT COUNT(*),
                        COUNT(member_id),
                        COALESCE(SUM(CASE WHEN created_at >= ?1 THEN 1 ELSE 0 END), 0)
                 FROM qr_codes",
                params![since],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?;
            Ok(QrStats {
                total,
                bound,
                unbound: total - bound,
                recent,
            })
        })
    }

    pub fn find_qr_member(&self, id: i64) -> Result<Option<QrMember>> {
        self.with_conn(|conn| {
            let member = conn
                .query_row(
                    &format!("SELECT {MEMBER_COLUMNS} FROM qr_members WHERE id = ?1"),
                    params![id],
                    member_from_row,
                )
                .optional()?;
            Ok(member)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    fn bind_request(qr_id: i64, group: &str, name: &str) -> BindQr {
        BindQr {
            qr_id,
            group_code: group.to_string(),
            full_name: name.to_string(),
            age: 72,
            emergency_contact: "9812345678".to_string(),
            address: Some("Ujjain".to_string()),
        }
    }

    #[test]
    fn bulk_create_returns_sequential_ids() {
        let store = Store::in_memory().unwrap();
        let first = store.create_qr().unwrap();
        let ids = store.bulk_create_qr(5).unwrap();
        assert_equal!(ids, (first + 1..=first + 5).collect::<Vec<_>>());
        assert_equal!(store.qr_stats(Utc::now()).unwrap().total, 6);
    }

    #[test]
    fn bind_claims_once() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let qr = store.create_qr().unwrap();

        let member = store
            .bind_qr(&bind_request(qr, &group, "Kamala"))
            .unwrap()
            .unwrap();
        assert_equal!(store.find_qr(qr).unwrap().unwrap().member_id, Some(member));

        // The losing bind leaves no orphaned profile behind.
        assert_equal!(store.bind_qr(&bind_request(qr, &group, "Other")).unwrap(), None);
        assert_equal!(store.find_qr_member(member + 1).unwrap(), None);

        let scan = store.scan_qr(qr).unwrap().unwrap();
        assert!(scan.is_bound);
        assert_equal!(scan.member.unwrap().full_name, "Kamala");
    }

    #[test]
    fn bind_unknown_tag_writes_nothing() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        assert_equal!(store.bind_qr(&bind_request(77, &group, "Kamala")).unwrap(), None);
        assert_equal!(store.find_qr_member(1).unwrap(), None);
    }

    #[test]
    fn unbind_then_rebind() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let qr = store.create_qr().unwrap();

        assert!(!store.unbind_qr(qr).unwrap());
        store.bind_qr(&bind_request(qr, &group, "Kamala")).unwrap();
        assert!(store.unbind_qr(qr).unwrap());

        let scan = store.scan_qr(qr).unwrap().unwrap();
        assert!(!scan.is_bound);
        assert!(scan.member.is_none());
        assert!(store.bind_qr(&bind_request(qr, &group, "Vimala")).unwrap().is_some());
    }

    #[test]
    fn listing_pages_newest_first() {
        let store = Store::in_memory().unwrap();
        let ids = store.bulk_create_qr(5).unwrap();

        let first_page: Vec<i64> = store.list_qr(1, 2).unwrap().iter().map(|q| q.id).collect();
        assert_equal!(first_page, vec![ids[4], ids[3]]);
        let last_page: Vec<i64> = store.list_qr(3, 2).unwrap().iter().map(|q| q.id).collect();
        assert_equal!(last_page, vec![ids[0]]);
        assert!(store.list_qr(4, 2).unwrap().is_empty());
    }

    #[test]
    fn search_matches_id_name_and_contact() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let ids = store.bulk_create_qr(12).unwrap();
        store
            .bind_qr(&bind_request(ids[0], &group, "Kamala Devi"))
            .unwrap();

        let by_name = store.search_qr("kamala", 20).unwrap();
        assert_equal!(by_name.len(), 1);
        assert_equal!(by_name[0].id, ids[0]);

        let by_contact = store.search_qr("98123", 20).unwrap();
        assert_equal!(by_contact.len(), 1);

        let by_id = store.search_qr("11", 20).unwrap();
        assert_equal!(by_id.iter().map(|q| q.id).collect::<Vec<_>>(), vec![11]);

        assert!(store.search_qr("%", 20).unwrap().is_empty());
    }

    #[test]
    fn stats_count_bound_and_recent() {
        let store = Store::in_memory().unwrap();
        let group = store.create_group().unwrap();
        let ids = store.bulk_create_qr(3).unwrap();
        store.bind_qr(&bind_request(ids[1], &group, "Kamala")).unwrap();

        let now = Utc::now();
        assert_equal!(
            store.qr_stats(now).unwrap(),
            QrStats {
                total: 3,
                bound: 1,
                unbound: 2,
                recent: 3
            }
        );
        assert_equal!(store.qr_stats(now + Duration::hours(25)).unwrap().recent, 0);
    }
}
