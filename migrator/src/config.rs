use anyhow::{bail, Context, Result};
use db_pipeline::ExistingDatabasePolicy;
use provision::FallbackPolicy;
use remote::{Credential, RemoteHost};
use serde::Deserialize;
use site_sync::{ContentLayout, FtpSettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "site-migrate.yaml";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub known_hosts: Option<PathBuf>,
    /// Inventory location on the source host.
    pub inventory_path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            host: String::new(),
            port: 22,
            user: "root".to_string(),
            password: None,
            key_file: None,
            connect_timeout_secs: 10,
            known_hosts: None,
            inventory_path: "/home/clp/htdocs/app/data/db.sq3".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DestinationConfig {
    pub inventory_path: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        DestinationConfig { inventory_path: PathBuf::from("/home/clp/htdocs/app/data/db.sq3") }
    }
}

/// Local paths. The four run artifacts default to files under `work_dir`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub work_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub credentials_file: Option<PathBuf>,
    pub status_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub vhost_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub home_root: PathBuf,
    pub cron_dir: PathBuf,
    /// Per-site dump directories on the source live under `{remote_backup_root}/{user}/backups`.
    pub remote_backup_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            work_dir: PathBuf::from("/root/site-migrate"),
            log_file: None,
            credentials_file: None,
            status_dir: None,
            staging_dir: None,
            vhost_dir: PathBuf::from("/etc/nginx/sites-enabled"),
            ssl_dir: PathBuf::from("/etc/nginx/ssl-certificates"),
            home_root: PathBuf::from("/home"),
            cron_dir: PathBuf::from("/etc/cron.d"),
            remote_backup_root: "/home".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| self.work_dir.join("migrate.log"))
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.credentials_file.clone().unwrap_or_else(|| self.work_dir.join("credentials.log"))
    }

    pub fn status_dir(&self) -> PathBuf {
        self.status_dir.clone().unwrap_or_else(|| self.work_dir.join("status"))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(|| self.work_dir.join("dumps"))
    }

    /// Where the source inventory snapshot is pulled to.
    pub fn snapshot_file(&self) -> PathBuf {
        self.work_dir.join("source-inventory.sq3")
    }

    pub fn content_layout(&self) -> ContentLayout {
        ContentLayout {
            vhost_dir: self.vhost_dir.clone(),
            ssl_dir: self.ssl_dir.clone(),
            home_root: self.home_root.clone(),
        }
    }

    pub fn remote_backup_dir(&self, user: &str) -> String {
        format!("{}/{}/backups", self.remote_backup_root.trim_end_matches('/'), user)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub tool: String,
    pub php_version: String,
    pub vhost_template: String,
    pub ftp_group: String,
    pub ftp_service: String,
    pub web_service: String,
    pub issue_certificates: bool,
    pub on_existing_database: ExistingDatabasePolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let policy = FallbackPolicy::default();
        let ftp = FtpSettings::default();
        ProvisioningConfig {
            tool: provision::DEFAULT_TOOL.to_string(),
            php_version: policy.php_version,
            vhost_template: policy.vhost_template,
            ftp_group: ftp.group,
            ftp_service: ftp.service,
            web_service: "nginx".to_string(),
            issue_certificates: false,
            on_existing_database: ExistingDatabasePolicy::default(),
        }
    }
}

impl ProvisioningConfig {
    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy { php_version: self.php_version.clone(), vhost_template: self.vhost_template.clone() }
    }

    pub fn ftp_settings(&self) -> FtpSettings {
        FtpSettings { group: self.ftp_group.clone(), service: self.ftp_service.clone() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub paths: PathsConfig,
    pub provisioning: ProvisioningConfig,
    pub max_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            paths: PathsConfig::default(),
            provisioning: ProvisioningConfig::default(),
            max_jobs: migrate_core::DEFAULT_MAX_JOBS,
        }
    }
}

/// Read the YAML config. An explicit path must exist; without one,
/// `./site-migrate.yaml` is used when present and defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| anyhow::anyhow!("invalid value for {name}: {value:?}"))
}

impl Config {
    /// Apply `SRC_*` and `MAX_JOBS` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SRC_HOST") {
            self.source.host = v;
        }
        if let Some(v) = lookup("SRC_PORT") {
            self.source.port = parse_env("SRC_PORT", &v)?;
        }
        if let Some(v) = lookup("SRC_USER") {
            self.source.user = v;
        }
        if let Some(v) = lookup("SRC_PASS") {
            self.source.password = Some(v);
        }
        if let Some(v) = lookup("SRC_KEY") {
            self.source.key_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MAX_JOBS") {
            self.max_jobs = parse_env("MAX_JOBS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.host.trim().is_empty() {
            bail!("source host is not set (source.host or SRC_HOST)");
        }
        if self.source.port == 0 {
            bail!("source port must be non-zero");
        }
        if self.max_jobs == 0 {
            bail!("max_jobs must be at least 1");
        }
        Ok(())
    }

    pub fn remote_host(&self) -> RemoteHost {
        let s = &self.source;
        let credential = match (&s.key_file, &s.password) {
            (Some(key), _) => Credential::KeyFile(key.clone()),
            (None, Some(pw)) if !pw.is_empty() => Credential::Password(pw.clone()),
            _ => Credential::Agent,
        };
        RemoteHost {
            host: s.host.clone(),
            port: s.port,
            user: s.user.clone(),
            credential,
            connect_timeout: Duration::from_secs(s.connect_timeout_secs.max(1)),
            known_hosts: s.known_hosts.clone(),
        }
    }
}
