//! Mirror of the control panel tables this tool reads and writes.
//!
//! The panel owns the real schema; this copy builds fixture inventories.

use anyhow::Result;
use rusqlite::Connection;

pub const PANEL_SCHEMA: &str = r#"
BEGIN;

CREATE TABLE site (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL,
  type            TEXT NOT NULL,
  domain_name     TEXT NOT NULL UNIQUE,
  root_directory  TEXT,
  user            TEXT NOT NULL,
  user_password   TEXT,
  vhost_template  TEXT,
  application     TEXT,
  varnish_cache   INTEGER
);

CREATE TABLE php_settings (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  site_id         INTEGER NOT NULL REFERENCES site(id) ON DELETE CASCADE,
  php_version     TEXT,
  memory_limit    TEXT,
  max_execution_time INTEGER
);

CREATE TABLE "database" (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  site_id         INTEGER NOT NULL REFERENCES site(id) ON DELETE CASCADE,
  database_server_id INTEGER,
  name            TEXT NOT NULL UNIQUE,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL
);

CREATE TABLE database_user (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  database_id     INTEGER NOT NULL REFERENCES "database"(id) ON DELETE CASCADE,
  user_name       TEXT NOT NULL,
  password        TEXT,
  permissions     TEXT,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL
);

CREATE TABLE ftp_user (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  site_id         INTEGER NOT NULL REFERENCES site(id) ON DELETE CASCADE,
  user_name       TEXT NOT NULL,
  home_directory  TEXT NOT NULL,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL
);

CREATE TABLE cron_job (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  site_id         INTEGER NOT NULL REFERENCES site(id) ON DELETE CASCADE,
  minute          TEXT NOT NULL,
  hour            TEXT NOT NULL,
  day             TEXT NOT NULL,
  month           TEXT NOT NULL,
  weekday         TEXT NOT NULL,
  command         TEXT NOT NULL,
  created_at      TEXT NOT NULL,
  updated_at      TEXT NOT NULL
);

CREATE INDEX idx_php_settings_site ON php_settings(site_id);
CREATE INDEX idx_database_site ON "database"(site_id);
CREATE INDEX idx_database_user_db ON database_user(database_id);
CREATE INDEX idx_ftp_user_site ON ftp_user(site_id);
CREATE INDEX idx_cron_job_site ON cron_job(site_id);

COMMIT;
"#;

/// Create an empty panel inventory at `path`.
pub fn init_panel_inventory(path: impl AsRef<std::path::Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(PANEL_SCHEMA)?;
    Ok(conn)
}
