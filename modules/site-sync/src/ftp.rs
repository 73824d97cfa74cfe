use anyhow::{Context, Result};
use credentials::{generate_password, CredentialKind, CredentialLog, CredentialRecord};
use inventory_sqlite::{DestinationInventory, FtpAccount};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::{HostOps, SiteContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpSettings {
    /// Shared group every FTP account must belong to.
    pub group: String,
    /// Daemon restarted after new accounts appear.
    pub service: String,
}

impl Default for FtpSettings {
    fn default() -> Self {
        FtpSettings { group: "ftp".to_string(), service: "proftpd".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FtpReport {
    pub created: usize,
    pub existing: usize,
    pub inserted: usize,
    pub failed: usize,
    pub restarted: bool,
}

enum Account {
    Created,
    Existing,
}

/// Recreate the site's FTP accounts. The OS account table decides whether an
/// account exists; the inventory row is added separately and only once.
pub fn replicate_ftp(
    host: &HostOps,
    dest: &DestinationInventory,
    credentials: &CredentialLog,
    ctx: &SiteContext,
    accounts: &[FtpAccount],
    settings: &FtpSettings,
) -> FtpReport {
    let mut report = FtpReport::default();

    for account in accounts {
        let name = account.user_name.as_str();
        match reconcile_account(host, credentials, ctx, account, settings) {
            Ok(Account::Created) => report.created += 1,
            Ok(Account::Existing) => report.existing += 1,
            Err(e) => {
                warn!(domain = %ctx.domain, user = name, error = %format!("{e:#}"), "ftp account not reconciled");
                report.failed += 1;
                continue;
            }
        }
        match dest.insert_ftp_account(ctx.dest_id, account) {
            Ok(true) => report.inserted += 1,
            Ok(false) => debug!(domain = %ctx.domain, user = name, "ftp row already present"),
            Err(e) => {
                warn!(domain = %ctx.domain, user = name, error = %e, "ftp row insert failed");
                report.failed += 1;
            }
        }
    }

    if report.created > 0 {
        match host.restart_service(&settings.service) {
            Ok(()) => report.restarted = true,
            Err(e) => warn!(domain = %ctx.domain, service = %settings.service, error = %e, "ftp service restart failed"),
        }
    }
    report
}

fn reconcile_account(
    host: &HostOps,
    credentials: &CredentialLog,
    ctx: &SiteContext,
    account: &FtpAccount,
    settings: &FtpSettings,
) -> Result<Account> {
    let name = account.user_name.as_str();
    let home = Path::new(&account.home_directory);

    let state = if host.user_exists(name)? {
        debug!(domain = %ctx.domain, user = name, "ftp account exists");
        Account::Existing
    } else {
        let password = generate_password();
        credentials.record(&CredentialRecord {
            kind: CredentialKind::Ftp,
            domain: &ctx.domain,
            user: name,
            database: None,
            password: &password,
        })?;
        host.create_user(name, home, &ctx.user).context("creating ftp account")?;
        host.set_password(name, &password).context("setting ftp password")?;
        info!(domain = %ctx.domain, user = name, "ftp account created");
        Account::Created
    };

    // runs for existing accounts too, so a half-finished earlier run converges
    host.ensure_dir(home, &ctx.user, &ctx.user)?;
    host.set_home(name, home)?;
    host.add_groups(name, &[ctx.user.as_str(), settings.group.as_str()])?;
    Ok(state)
}
