use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::InventoryRead;

/// Read-only view of the point-in-time copy of the source host's inventory.
pub struct SourceInventory {
    conn: Connection,
}

/// The live inventory on this host. Only targeted updates and guarded inserts
/// are issued against it; the panel itself owns creation of sites.
pub struct DestinationInventory {
    conn: Connection,
}

impl SourceInventory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening source inventory snapshot {}", path.display()))?;
        let inv = SourceInventory { conn };
        ensure_panel_tables(&inv)?;
        Ok(inv)
    }
}

impl DestinationInventory {
    /// Open an existing inventory. A missing file is an error, never created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening destination inventory {}", path.display()))?;
        apply_pragmas(&conn)?;
        let inv = DestinationInventory { conn };
        ensure_panel_tables(&inv)?;
        Ok(inv)
    }
}

impl InventoryRead for SourceInventory {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl InventoryRead for DestinationInventory {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // the panel keeps writing to this file while we run
    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn ensure_panel_tables(inv: &impl InventoryRead) -> Result<()> {
    for table in ["site", "php_settings", "database", "database_user", "ftp_user", "cron_job"] {
        if !inv.table_exists(table)? {
            bail!("inventory is missing table '{}'", table);
        }
    }
    Ok(())
}
