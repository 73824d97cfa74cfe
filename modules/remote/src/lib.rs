//! Authenticated command and file-transfer access to the source host.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use migrate_core::CommandOutput;

mod ssh;
pub use ssh::{classify_failure, SshRemote};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password fed to `sshpass` through the environment, never on the command line.
    Password(String),
    KeyFile(PathBuf),
    /// Whatever the local ssh agent or default identity offers.
    Agent,
}

#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub connect_timeout: Duration,
    /// Pins accepted host keys to this file instead of the user's default.
    pub known_hosts: Option<PathBuf>,
}

impl RemoteHost {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Source host to local.
    Pull,
    /// Local to source host.
    Push,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Remove local files that no longer exist on the source.
    pub delete: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl SyncOptions {
    pub fn mirrored() -> Self {
        SyncOptions { delete: true, ..Default::default() }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection to {host} timed out: {detail}")]
    Timeout { host: String, detail: String },
    #[error("authentication to {host} failed: {detail}")]
    Auth { host: String, detail: String },
    #[error("remote command `{command}` exited with status {status}: {stderr}")]
    NonZeroExit { command: String, status: i32, stdout: String, stderr: String },
    #[error("transfer of {path} failed with status {status}: {detail}")]
    Transfer { path: String, status: i32, detail: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Short label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Timeout { .. } => "timeout",
            RemoteError::Auth { .. } => "auth",
            RemoteError::NonZeroExit { .. } => "exit",
            RemoteError::Transfer { .. } => "transfer",
            RemoteError::Spawn { .. } => "spawn",
        }
    }
}

#[async_trait]
pub trait Remote: Send + Sync {
    /// `user@host:port`, for logs.
    fn describe(&self) -> String;

    /// Run a shell command on the source host. A non-zero exit is an error.
    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn transfer_file(&self, remote_path: &str, local_path: &Path, direction: Direction) -> Result<(), RemoteError>;

    /// Replicate the contents of `remote_dir` into `local_dir`, keeping
    /// ownership and permissions.
    async fn sync_tree(&self, remote_dir: &str, local_dir: &Path, opts: &SyncOptions) -> Result<(), RemoteError>;
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"/._-=:,@+%".contains(&b)) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("/home/a/backups/a_db.sql.gz"), "/home/a/backups/a_db.sql.gz");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn error_kinds() {
        let e = RemoteError::Transfer { path: "/x".into(), status: 23, detail: "partial".into() };
        assert_eq!(e.kind(), "transfer");
        assert!(e.to_string().contains("/x"));
    }
}
