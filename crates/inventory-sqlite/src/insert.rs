use anyhow::{bail, Result};
use rusqlite::params;
use time::OffsetDateTime;
use tracing::debug;

use crate::{CronEntry, DestinationInventory, FtpAccount, InventoryRead, SiteId, SiteMetadata};

fn now_stamp() -> String {
    let t = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

// All values are bound as parameters, so quotes and delimiters in commands or
// names never reach the SQL text.
impl DestinationInventory {
    /// Overwrite the reconciled columns of one site. `None` is written as NULL.
    pub fn update_site_metadata(&self, site_id: SiteId, meta: &SiteMetadata) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE site SET vhost_template=?, application=?, varnish_cache=?, updated_at=? WHERE id=?",
            params![
                meta.vhost_template,
                meta.application,
                meta.varnish_cache.map(i64::from),
                now_stamp(),
                site_id
            ],
        )?;
        if changed == 0 {
            bail!("no site with id {site_id} in the destination inventory");
        }
        debug!(site_id, "site metadata reconciled");
        Ok(())
    }

    pub fn ftp_account_exists(&self, site_id: SiteId, user_name: &str) -> Result<bool> {
        let cnt: i64 = self.conn().query_row(
            "SELECT COUNT(1) FROM ftp_user WHERE site_id=? AND user_name=?",
            params![site_id, user_name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Insert unless a row for (site, user_name) exists. Returns whether a row was written.
    pub fn insert_ftp_account(&self, site_id: SiteId, account: &FtpAccount) -> Result<bool> {
        if self.ftp_account_exists(site_id, &account.user_name)? {
            debug!(site_id, user = %account.user_name, "ftp row already present");
            return Ok(false);
        }
        let now = now_stamp();
        self.conn().execute(
            "INSERT INTO ftp_user(site_id,user_name,home_directory,created_at,updated_at) VALUES (?,?,?,?,?)",
            params![site_id, account.user_name, account.home_directory, now, now],
        )?;
        Ok(true)
    }

    pub fn cron_entry_exists(&self, site_id: SiteId, entry: &CronEntry) -> Result<bool> {
        let cnt: i64 = self.conn().query_row(
            "SELECT COUNT(1) FROM cron_job WHERE site_id=? AND minute=? AND hour=? AND day=? AND month=? AND weekday=? AND command=?",
            params![site_id, entry.minute, entry.hour, entry.day, entry.month, entry.weekday, entry.command],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Insert unless the full (site, schedule, command) tuple exists. Returns whether a row was written.
    pub fn insert_cron_entry(&self, site_id: SiteId, entry: &CronEntry) -> Result<bool> {
        if self.cron_entry_exists(site_id, entry)? {
            debug!(site_id, schedule = %entry.schedule(), "cron row already present");
            return Ok(false);
        }
        let now = now_stamp();
        self.conn().execute(
            "INSERT INTO cron_job(site_id,minute,hour,day,month,weekday,command,created_at,updated_at) VALUES (?,?,?,?,?,?,?,?,?)",
            params![site_id, entry.minute, entry.hour, entry.day, entry.month, entry.weekday, entry.command, now, now],
        )?;
        Ok(true)
    }
}
