use anyhow::{bail, Context, Result};
use credentials::CredentialLog;
use db_pipeline::{group_bindings, ExportJob, Exporter, Importer, StatusStore};
use inventory_sqlite::{DestinationInventory, SourceInventory};
use migrate_core::{JobLimiter, LocalExec};
use provision::{FallbackPolicy, Provisioner};
use remote::{Direction, Remote};
use site_sync::{
    replicate_content, replicate_cron, replicate_ftp, ContentLayout, FtpSettings, HostOps, SiteContext,
    SiteProvisioner,
};
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use crate::config::Config;
use crate::plan::{build_plans, SitePlan};
use crate::summary::{RunSummary, SiteOutcome, SiteReport};

/// Drives one batch run: snapshot, per-site replication, then the two
/// database phases.
pub struct Orchestrator {
    config: Config,
    remote: Arc<dyn Remote>,
    exec: Arc<dyn LocalExec>,
}

/// What one run shares across sites.
struct RunContext {
    dest: DestinationInventory,
    credentials: Arc<CredentialLog>,
    provisioner: Arc<Provisioner>,
    host: HostOps,
    policy: FallbackPolicy,
    layout: ContentLayout,
    ftp: FtpSettings,
}

struct SiteRun {
    report: SiteReport,
    /// Set once the site exists at the destination.
    context: Option<SiteContext>,
    vhost_copied: bool,
}

impl Orchestrator {
    pub fn new(config: Config, remote: Arc<dyn Remote>, exec: Arc<dyn LocalExec>) -> Self {
        Orchestrator { config, remote, exec }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pull a fresh copy of the source inventory and open it read-only.
    pub async fn fetch_snapshot(&self) -> Result<SourceInventory> {
        let local = self.config.paths.snapshot_file();
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        self.remote
            .transfer_file(&self.config.source.inventory_path, &local, Direction::Pull)
            .await
            .with_context(|| format!("cannot obtain source inventory snapshot from {}", self.remote.describe()))?;
        info!(path = %local.display(), "source inventory snapshot pulled");
        SourceInventory::open(&local)
    }

    /// Snapshot and derived per-site plans, without changing anything locally.
    pub async fn plan(&self, only: &[String]) -> Result<Vec<SitePlan>> {
        let source = self.fetch_snapshot().await?;
        let plans = build_plans(&source, only)?;
        if plans.is_empty() {
            bail!("no php sites to migrate in the source inventory");
        }
        Ok(plans)
    }

    /// Run the whole migration. `Err` means a setup failure; every per-site
    /// and per-database failure ends up in the summary instead.
    pub async fn run(&self, only: &[String]) -> Result<RunSummary> {
        let paths = &self.config.paths;
        fs::create_dir_all(&paths.work_dir).with_context(|| format!("creating {}", paths.work_dir.display()))?;

        let plans = self.plan(only).await?;
        info!(sites = plans.len(), "migration plan ready");

        let ctx = RunContext {
            dest: DestinationInventory::open(&self.config.destination.inventory_path)?,
            credentials: Arc::new(CredentialLog::open(paths.credentials_file())?),
            provisioner: Arc::new(Provisioner::new(self.exec.clone(), self.config.provisioning.tool.clone())),
            host: HostOps::new(self.exec.clone()),
            policy: self.config.provisioning.fallback_policy(),
            layout: paths.content_layout(),
            ftp: self.config.provisioning.ftp_settings(),
        };
        let status = StatusStore::open(paths.status_dir())?;

        let mut summary = RunSummary {
            log_file: paths.log_file(),
            credentials_file: ctx.credentials.path().to_path_buf(),
            status_dir: status.dir().to_path_buf(),
            ..RunSummary::default()
        };

        let mut jobs = Vec::new();
        let mut reload_web = false;
        for plan in &plans {
            let span = tracing::info_span!("site", domain = %plan.site.domain_name);
            let run = self.migrate_site(&ctx, plan).instrument(span).await;
            reload_web |= run.vhost_copied;
            if let Some(site) = run.context {
                let remote_dir = paths.remote_backup_dir(&site.source_user);
                jobs.extend(
                    group_bindings(&plan.databases)
                        .into_iter()
                        .map(|unit| ExportJob { unit, remote_dir: remote_dir.clone() }),
                );
            }
            summary.add_site(run.report);
        }

        let exporter = Exporter {
            remote: self.remote.clone(),
            exec: self.exec.clone(),
            provisioner: ctx.provisioner.clone(),
            status: status.clone(),
            staging_dir: paths.staging_dir(),
            limiter: JobLimiter::new(self.config.max_jobs),
        };
        info!(databases = jobs.len(), max_jobs = exporter.limiter.limit(), "exporting databases");
        let exports = exporter.export_all(jobs).await?;
        summary.peak_export_jobs = exporter.limiter.peak();

        let staged: Vec<_> = exports.iter().map(|e| (e.unit.clone(), e.dump.clone())).collect();
        summary.set_exports(exports);

        let importer = Importer {
            provisioner: ctx.provisioner.clone(),
            status: status.clone(),
            credentials: ctx.credentials.clone(),
            policy: self.config.provisioning.on_existing_database,
        };
        let imports = tokio::task::spawn_blocking(move || importer.import_all(&staged))
            .await
            .context("import phase aborted")?;
        summary.set_imports(imports);

        if reload_web {
            let service = &self.config.provisioning.web_service;
            if let Err(e) = ctx.host.reload_service(service) {
                warn!(service = %service, error = %e, "web server reload failed");
                summary.warnings += 1;
            }
        }

        info!(
            sites = summary.sites_total,
            failed = summary.sites_failed,
            imports_ok = summary.imports_ok,
            imports_failed = summary.imports_failed,
            "migration finished"
        );
        Ok(summary)
    }

    async fn migrate_site(&self, ctx: &RunContext, plan: &SitePlan) -> SiteRun {
        let site = &plan.site;
        let mut report = SiteReport {
            domain: site.domain_name.clone(),
            outcome: SiteOutcome::Migrated,
            created: false,
            warnings: 0,
            ftp_created: 0,
            ftp_inserted: 0,
            cron_inserted: 0,
        };

        let provisioner = SiteProvisioner {
            dest: &ctx.dest,
            provisioner: &ctx.provisioner,
            policy: &ctx.policy,
            credentials: &ctx.credentials,
        };
        let provisioned = match provisioner.provision(site) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "site skipped");
                report.outcome = SiteOutcome::Failed(e.to_string());
                return SiteRun { report, context: None, vhost_copied: false };
            }
        };
        report.created = provisioned.created;
        if provisioned.reconcile_error.is_some() {
            report.warnings += 1;
        }

        let site_ctx = SiteContext {
            domain: site.domain_name.clone(),
            source_id: site.id,
            dest_id: provisioned.dest_id,
            source_user: if site.user.trim().is_empty() { provisioned.user.clone() } else { site.user.clone() },
            user: provisioned.user,
        };

        let issuer = if self.config.provisioning.issue_certificates { Some(ctx.provisioner.as_ref()) } else { None };
        let content = replicate_content(self.remote.as_ref(), &ctx.host, &ctx.layout, &site_ctx, issuer).await;
        report.warnings += content.warnings();

        let ftp = replicate_ftp(&ctx.host, &ctx.dest, &ctx.credentials, &site_ctx, &plan.ftp_accounts, &ctx.ftp);
        report.warnings += ftp.failed;
        report.ftp_created = ftp.created;
        report.ftp_inserted = ftp.inserted;

        let cron = replicate_cron(&ctx.dest, &self.config.paths.cron_dir, &site_ctx, &plan.cron_entries);
        report.warnings += cron.failed;
        report.cron_inserted = cron.inserted;

        info!(warnings = report.warnings, "site done");
        SiteRun { report, context: Some(site_ctx), vhost_copied: content.vhost_ok }
    }
}

/// Markers currently on disk, without creating the status directory.
pub fn read_status(config: &Config) -> Result<Vec<(String, db_pipeline::MigrationStatus)>> {
    let dir = config.paths.status_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    StatusStore::open(dir)?.list()
}
