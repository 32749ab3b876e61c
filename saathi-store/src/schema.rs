use anyhow::Result;
use rusqlite::Connection;

// Timestamps are stored as unix milliseconds.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_code TEXT UNIQUE,
    admin_id INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL,
    mobile_number TEXT NOT NULL UNIQUE,
    age INTEGER,
    group_code TEXT REFERENCES groups(group_code),
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_verified INTEGER NOT NULL DEFAULT 0,
    otp TEXT,
    otp_expires_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_group ON users(group_code);

CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    captured_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sos_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    group_code TEXT NOT NULL REFERENCES groups(group_code),
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sos_group_created ON sos_alerts(group_code, created_at);

CREATE TABLE IF NOT EXISTS qr_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_code TEXT NOT NULL REFERENCES groups(group_code),
    full_name TEXT NOT NULL,
    age INTEGER NOT NULL,
    emergency_contact TEXT NOT NULL,
    address TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS qr_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id INTEGER REFERENCES qr_members(id),
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_qr_member ON qr_codes(member_id);
CREATE INDEX IF NOT EXISTS idx_qr_created ON qr_codes(created_at);
";

pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
