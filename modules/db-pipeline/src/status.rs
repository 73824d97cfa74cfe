use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Per-database marker value. Only `Ok` lets a database into the import phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Pending,
    ExportFailed,
    CopyFailed,
    IntegrityFailed,
    Ok,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::ExportFailed => "EXPORT_FAILED",
            MigrationStatus::CopyFailed => "COPY_FAILED",
            MigrationStatus::IntegrityFailed => "INTEGRITY_FAILED",
            MigrationStatus::Ok => "OK",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MigrationStatus::ExportFailed | MigrationStatus::CopyFailed | MigrationStatus::IntegrityFailed
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown status marker {0:?}")]
pub struct UnknownStatus(String);

impl FromStr for MigrationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PENDING" => Ok(MigrationStatus::Pending),
            "EXPORT_FAILED" => Ok(MigrationStatus::ExportFailed),
            "COPY_FAILED" => Ok(MigrationStatus::CopyFailed),
            "INTEGRITY_FAILED" => Ok(MigrationStatus::IntegrityFailed),
            "OK" => Ok(MigrationStatus::Ok),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Directory of `{database}.status` files. Each export worker only ever
/// touches its own database's file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

fn check_name(database: &str) -> Result<()> {
    if database.is_empty()
        || database.starts_with('.')
        || !database.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        bail!("database name {database:?} is not usable as a marker file name");
    }
    Ok(())
}

impl StatusStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("creating status dir {}", dir.display()))?;
        Ok(StatusStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, database: &str) -> PathBuf {
        self.dir.join(format!("{database}.status"))
    }

    /// Replace the marker through a temp file and rename, so a reader never
    /// sees a half-written value.
    pub fn write(&self, database: &str, status: MigrationStatus) -> Result<()> {
        check_name(database)?;
        let target = self.marker_path(database);
        let tmp = self.dir.join(format!(".{database}.status.tmp"));
        {
            let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
            writeln!(f, "{status}")?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &target).with_context(|| format!("renaming into {}", target.display()))?;
        Ok(())
    }

    /// `None` when no marker exists yet.
    pub fn read(&self, database: &str) -> Result<Option<MigrationStatus>> {
        check_name(database)?;
        let path = self.marker_path(database);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text.parse::<MigrationStatus>().with_context(|| format!("reading {}", path.display()))?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Every readable marker, sorted by database name. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<(String, MigrationStatus)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(db) = name.strip_suffix(".status") else { continue };
            if db.starts_with('.') {
                continue;
            }
            if let Ok(Some(status)) = self.read(db) {
                out.push((db.to_string(), status));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
