//! Fresh credentials and the append-only log they are written to.
//!
//! A generated password exists nowhere else, so every record is flushed to
//! disk before the caller moves on to anything that can fail.

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// 24 alphanumeric characters, about 142 bits of entropy.
pub const PASSWORD_LEN: usize = 24;

pub fn generate_password() -> String {
    generate_password_len(PASSWORD_LEN)
}

pub fn generate_password_len(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Entropy of a uniformly drawn alphanumeric password of `len` characters.
pub fn entropy_bits(len: usize) -> f64 {
    len as f64 * 62f64.log2()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    SiteUser,
    Ftp,
    Database,
}

impl CredentialKind {
    fn label(self) -> &'static str {
        match self {
            CredentialKind::SiteUser => "site",
            CredentialKind::Ftp => "ftp",
            CredentialKind::Database => "database",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRecord<'a> {
    pub kind: CredentialKind,
    pub domain: &'a str,
    pub user: &'a str,
    pub database: Option<&'a str>,
    pub password: &'a str,
}

impl CredentialRecord<'_> {
    fn render(&self, at: &str) -> String {
        let mut line = format!("{} kind={} site={}", at, self.kind.label(), self.domain);
        if let Some(db) = self.database {
            line.push_str(&format!(" database={db}"));
        }
        line.push_str(&format!(" user={} password={}", self.user, self.password));
        line
    }
}

pub struct CredentialLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CredentialLog {
    /// Open (or create) the log for appending, readable by the owner only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)
            .with_context(|| format!("opening credential log {}", path.display()))?;
        // mode() only applies on creation
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        Ok(CredentialLog { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, rec: &CredentialRecord<'_>) -> Result<()> {
        let at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new());
        let line = rec.render(&at);
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("credential log lock poisoned"))?;
        writeln!(file, "{line}").with_context(|| format!("writing {}", self.path.display()))?;
        file.sync_data()?;
        tracing::info!(kind = rec.kind.label(), site = rec.domain, user = rec.user, "credential recorded");
        Ok(())
    }
}
