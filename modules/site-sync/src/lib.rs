//! Per-site replication steps: creation and metadata reconciliation, content,
//! FTP accounts and cron entries.

use inventory_sqlite::SiteId;

mod content;
mod cron;
mod ftp;
mod host;
mod provisioner;

pub use content::{replicate_content, ContentLayout, ContentReport};
pub use cron::{render_fragment, replicate_cron, CronReport};
pub use ftp::{replicate_ftp, FtpReport, FtpSettings};
pub use host::HostOps;
pub use provisioner::{ProvisionedSite, SiteError, SiteProvisioner, SiteState};

/// The site a step is working on, passed explicitly to every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub domain: String,
    /// Id in the source snapshot; only valid against the snapshot.
    pub source_id: SiteId,
    /// Id in the destination inventory; used for every destination write.
    pub dest_id: SiteId,
    /// Owning system account on this host.
    pub user: String,
    /// Owning account on the source host, for remote paths.
    pub source_user: String,
}
