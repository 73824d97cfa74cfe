use anyhow::Result;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{CronEntry, DatabaseBinding, FtpAccount, Site, SiteId};

const SITE_COLUMNS: &str = "s.id, s.domain_name, s.user, COALESCE(s.user_password, ''), p.php_version, \
     s.vhost_template, s.application, s.varnish_cache, s.type, s.root_directory";

/// Queries shared by the source snapshot and the destination inventory.
///
/// Sites are correlated across inventories by `domain_name` only.
pub trait InventoryRead {
    fn conn(&self) -> &Connection;

    fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn().query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// All sites of type `php`, ordered by id.
    fn php_sites(&self) -> Result<Vec<Site>> {
        let sql = format!(
            "SELECT {SITE_COLUMNS} FROM site s \
             LEFT JOIN php_settings p ON p.site_id = s.id \
             WHERE s.type = 'php' GROUP BY s.id ORDER BY s.id"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], site_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn site_by_domain(&self, domain: &str) -> Result<Option<Site>> {
        let sql = format!(
            "SELECT {SITE_COLUMNS} FROM site s \
             LEFT JOIN php_settings p ON p.site_id = s.id \
             WHERE s.domain_name = ? GROUP BY s.id"
        );
        Ok(self.conn().query_row(&sql, [domain], site_from_row).optional()?)
    }

    fn site_id_by_domain(&self, domain: &str) -> Result<Option<SiteId>> {
        Ok(self
            .conn()
            .query_row("SELECT id FROM site WHERE domain_name = ?", [domain], |r| r.get(0))
            .optional()?)
    }

    fn ftp_accounts(&self, site_id: SiteId) -> Result<Vec<FtpAccount>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_name, home_directory FROM ftp_user WHERE site_id = ? ORDER BY id")?;
        let rows = stmt.query_map([site_id], |r| {
            Ok(FtpAccount { user_name: r.get(0)?, home_directory: r.get(1)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn cron_entries(&self, site_id: SiteId) -> Result<Vec<CronEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT minute, hour, day, month, weekday, command FROM cron_job WHERE site_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([site_id], |r| {
            Ok(CronEntry {
                minute: r.get(0)?,
                hour: r.get(1)?,
                day: r.get(2)?,
                month: r.get(3)?,
                weekday: r.get(4)?,
                command: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Site/database/database-user join. A database without a user yields no binding.
    fn database_bindings(&self, site_id: SiteId) -> Result<Vec<DatabaseBinding>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.domain_name, d.name, u.user_name FROM site s \
             JOIN \"database\" d ON d.site_id = s.id \
             JOIN database_user u ON u.database_id = d.id \
             WHERE s.id = ? ORDER BY d.id, u.id",
        )?;
        let rows = stmt.query_map(params![site_id], |r| {
            Ok(DatabaseBinding { domain_name: r.get(0)?, database_name: r.get(1)?, database_user: r.get(2)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn site_from_row(r: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: r.get(0)?,
        domain_name: r.get(1)?,
        user: r.get(2)?,
        user_password: r.get(3)?,
        php_version: r.get(4)?,
        vhost_template: r.get(5)?,
        application: r.get(6)?,
        varnish_cache: flag(r.get_ref(7)?),
        site_type: r.get(8)?,
        root_directory: r.get(9)?,
    })
}

/// The panel has stored this flag as integer and as text over time.
fn flag(value: ValueRef<'_>) -> Option<bool> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(n) => Some(n != 0),
        ValueRef::Real(f) => Some(f != 0.0),
        ValueRef::Text(t) => {
            let s = std::str::from_utf8(t).ok()?.trim().to_ascii_lowercase();
            match s.as_str() {
                "" => None,
                "0" | "false" | "no" | "off" => Some(false),
                _ => Some(true),
            }
        }
    }
}
