use anyhow::Result;
use inventory_sqlite::schema::init_panel_inventory;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Builder for panel inventories used as source snapshot or destination.
pub struct InventoryFixture {
    path: PathBuf,
    conn: Connection,
}

impl InventoryFixture {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = init_panel_inventory(&path)?;
        Ok(InventoryFixture { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a php site with a php_settings row. Returns the new site id.
    pub fn site(&self, domain: &str, user: &str, password: &str, php_version: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO site(created_at,updated_at,type,domain_name,user,user_password,vhost_template,application,varnish_cache)
             VALUES ('t','t','php',?,?,?,'WordPress','wordpress',1)",
            params![domain, user, password],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO php_settings(site_id,php_version) VALUES (?,?)",
            params![id, php_version],
        )?;
        Ok(id)
    }

    pub fn site_of_type(&self, domain: &str, user: &str, site_type: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO site(created_at,updated_at,type,domain_name,user) VALUES ('t','t',?,?,?)",
            params![site_type, domain, user],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn database(&self, site_id: i64, name: &str, user: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO \"database\"(site_id,name,created_at,updated_at) VALUES (?,?,'t','t')",
            params![site_id, name],
        )?;
        let db_id = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO database_user(database_id,user_name,password,created_at,updated_at) VALUES (?,?,'old','t','t')",
            params![db_id, user],
        )?;
        Ok(())
    }

    /// Grant another user on a database added with [`Self::database`].
    pub fn database_user(&self, database: &str, user: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO database_user(database_id,user_name,password,created_at,updated_at)
             SELECT id,?,'old','t','t' FROM \"database\" WHERE name = ?",
            params![user, database],
        )?;
        Ok(())
    }

    pub fn ftp(&self, site_id: i64, user_name: &str, home: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ftp_user(site_id,user_name,home_directory,created_at,updated_at) VALUES (?,?,?,'t','t')",
            params![site_id, user_name, home],
        )?;
        Ok(())
    }

    pub fn cron(&self, site_id: i64, schedule: [&str; 5], command: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cron_job(site_id,minute,hour,day,month,weekday,command,created_at,updated_at) VALUES (?,?,?,?,?,?,?,'t','t')",
            params![site_id, schedule[0], schedule[1], schedule[2], schedule[3], schedule[4], command],
        )?;
        Ok(())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        Ok(self.conn.query_row(&format!("SELECT COUNT(1) FROM \"{table}\""), [], |r| r.get(0))?)
    }
}
