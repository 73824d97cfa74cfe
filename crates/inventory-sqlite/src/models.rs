use serde::{Deserialize, Serialize};

/// Row id local to one inventory. Never compare ids across inventories.
pub type SiteId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub domain_name: String,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub user_password: String,
    pub php_version: Option<String>,
    pub vhost_template: Option<String>,
    pub application: Option<String>,
    pub varnish_cache: Option<bool>,
    pub site_type: String,
    pub root_directory: Option<String>,
}

impl Site {
    pub fn metadata(&self) -> SiteMetadata {
        SiteMetadata {
            vhost_template: non_empty(self.vhost_template.as_deref()),
            application: non_empty(self.application.as_deref()),
            varnish_cache: self.varnish_cache,
        }
    }
}

/// The site columns reconciled from source into destination after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub vhost_template: Option<String>,
    pub application: Option<String>,
    pub varnish_cache: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpAccount {
    pub user_name: String,
    pub home_directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEntry {
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub weekday: String,
    pub command: String,
}

impl CronEntry {
    pub fn schedule(&self) -> String {
        format!("{} {} {} {} {}", self.minute, self.hour, self.day, self.month, self.weekday)
    }
}

/// One (site, database, database user) triple to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseBinding {
    pub domain_name: String,
    pub database_name: String,
    pub database_user: String,
}

/// Empty or whitespace-only strings become `None` so they are written as NULL.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
