use anyhow::Result;
use inventory_sqlite::{CronEntry, DatabaseBinding, FtpAccount, InventoryRead, Site, SourceInventory};
use serde::Serialize;
use tracing::warn;

/// Everything the snapshot says about one site.
#[derive(Debug, Clone, Serialize)]
pub struct SitePlan {
    pub site: Site,
    pub databases: Vec<DatabaseBinding>,
    pub ftp_accounts: Vec<FtpAccount>,
    pub cron_entries: Vec<CronEntry>,
}

/// Plans for every php site in the snapshot, in id order. A non-empty
/// `only` restricts the result to those domains.
pub fn build_plans(source: &SourceInventory, only: &[String]) -> Result<Vec<SitePlan>> {
    let mut sites = source.php_sites()?;
    if !only.is_empty() {
        for d in only {
            if !sites.iter().any(|s| &s.domain_name == d) {
                warn!(domain = %d, "requested site is not a php site in the source inventory");
            }
        }
        sites.retain(|s| only.contains(&s.domain_name));
    }
    let mut plans = Vec::with_capacity(sites.len());
    for site in sites {
        plans.push(SitePlan {
            databases: source.database_bindings(site.id)?,
            ftp_accounts: source.ftp_accounts(site.id)?,
            cron_entries: source.cron_entries(site.id)?,
            site,
        });
    }
    Ok(plans)
}

pub fn render_plan_text(plans: &[SitePlan]) -> String {
    let mut out = String::new();
    for p in plans {
        let php = p.site.php_version.as_deref().unwrap_or("-");
        out.push_str(&format!("{} (user {}, php {})\n", p.site.domain_name, p.site.user, php));
        for db in &p.databases {
            out.push_str(&format!("  database {} user {}\n", db.database_name, db.database_user));
        }
        for f in &p.ftp_accounts {
            out.push_str(&format!("  ftp {} home {}\n", f.user_name, f.home_directory));
        }
        for c in &p.cron_entries {
            out.push_str(&format!("  cron {} {}\n", c.schedule(), c.command));
        }
    }
    out
}
