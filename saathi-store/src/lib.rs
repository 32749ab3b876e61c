//! SQLite persistence for groups, members, locations, SOS alerts and QR tags.
//!
//! A [`Store`] owns a single connection behind a mutex. Every call is
//! blocking, so async callers should go through `spawn_blocking`.

mod alerts;
mod locations;
mod qr;
mod render;
mod schema;
mod users;

pub use alerts::{SosAlert, DEFAULT_ALERT_LIMIT};
pub use locations::LocationRecord;
pub use qr::{BindQr, QrListing, QrMember, QrScan, QrStats, QrTag};
pub use render::{render_qr_sheet, render_qr_svg, SheetEntry, TAGS_PER_PAGE};
pub use users::{NewUser, User};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Shared database handle
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&mut conn)
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn reopening_a_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saathi.db");

        let code = {
            let store = Store::open(&path).unwrap();
            store.create_group().unwrap()
        };

        let store = Store::open(&path).unwrap();
        assert!(store.group_exists(&code).unwrap());
        assert_equal!(code, "GR00001");
    }

    #[test]
    fn millis_conversion_is_lossless_at_millisecond_precision() {
        let at = DateTime::from_timestamp_millis(1_775_716_200_123).unwrap();
        assert_equal!(from_millis(to_millis(at)), at);
    }
}
