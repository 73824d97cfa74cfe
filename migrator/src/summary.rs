use db_pipeline::{ExportOutcome, ImportOutcome, ImportResult, MigrationStatus};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum SiteOutcome {
    Migrated,
    /// Creation failed; nothing else was attempted for this site.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub domain: String,
    pub outcome: SiteOutcome,
    pub created: bool,
    pub warnings: usize,
    pub ftp_created: usize,
    pub ftp_inserted: usize,
    pub cron_inserted: usize,
}

/// End-of-run counters plus where to find the details.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub sites_total: usize,
    pub sites_migrated: usize,
    pub sites_failed: usize,
    pub sites_created: usize,
    pub warnings: usize,
    pub ftp_accounts_created: usize,
    pub cron_rows_inserted: usize,
    pub databases_total: usize,
    pub exports_ok: usize,
    pub exports_failed: usize,
    pub imports_attempted: usize,
    pub imports_ok: usize,
    pub imports_failed: usize,
    pub imports_skipped: usize,
    /// Source database users with no counterpart at the destination.
    pub database_users_missing: usize,
    pub peak_export_jobs: usize,
    pub log_file: PathBuf,
    pub credentials_file: PathBuf,
    pub status_dir: PathBuf,
    pub sites: Vec<SiteReport>,
    pub exports: Vec<ExportOutcome>,
    pub imports: Vec<ImportResult>,
}

impl RunSummary {
    pub fn add_site(&mut self, report: SiteReport) {
        self.sites_total += 1;
        match report.outcome {
            SiteOutcome::Migrated => self.sites_migrated += 1,
            SiteOutcome::Failed(_) => self.sites_failed += 1,
        }
        if report.created {
            self.sites_created += 1;
        }
        self.warnings += report.warnings;
        self.ftp_accounts_created += report.ftp_created;
        self.cron_rows_inserted += report.cron_inserted;
        self.sites.push(report);
    }

    pub fn set_exports(&mut self, exports: Vec<ExportOutcome>) {
        self.databases_total = exports.len();
        self.exports_ok = exports.iter().filter(|e| e.status == MigrationStatus::Ok).count();
        self.exports_failed = exports.iter().filter(|e| e.status.is_failure()).count();
        self.exports = exports;
    }

    pub fn set_imports(&mut self, imports: Vec<ImportResult>) {
        for r in &imports {
            match &r.outcome {
                ImportOutcome::Imported => self.imports_ok += 1,
                ImportOutcome::ImportFailed(_) | ImportOutcome::CreateFailed(_) => self.imports_failed += 1,
                ImportOutcome::SkippedExisting | ImportOutcome::NotReady(_) => self.imports_skipped += 1,
            }
            if r.outcome.attempted() {
                self.imports_attempted += 1;
            }
            self.database_users_missing += r.missing_users.len();
        }
        self.warnings += self.database_users_missing;
        self.imports = imports;
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Migration summary\n");
        out.push_str(&format!(
            "  sites:     {} processed, {} migrated, {} failed, {} created\n",
            self.sites_total, self.sites_migrated, self.sites_failed, self.sites_created
        ));
        out.push_str(&format!(
            "  databases: {} total, {} exported, {} export failures (peak {} concurrent)\n",
            self.databases_total, self.exports_ok, self.exports_failed, self.peak_export_jobs
        ));
        out.push_str(&format!(
            "  imports:   {} attempted, {} ok, {} failed, {} skipped\n",
            self.imports_attempted, self.imports_ok, self.imports_failed, self.imports_skipped
        ));
        out.push_str(&format!(
            "  ftp:       {} accounts created; cron: {} rows inserted; warnings: {}\n",
            self.ftp_accounts_created, self.cron_rows_inserted, self.warnings
        ));
        for s in &self.sites {
            if let SiteOutcome::Failed(e) = &s.outcome {
                out.push_str(&format!("  FAILED site {}: {}\n", s.domain, e));
            }
        }
        for e in &self.exports {
            if e.status != MigrationStatus::Ok {
                out.push_str(&format!("  {} database {}\n", e.status, e.unit.database_name));
            }
        }
        for r in &self.imports {
            for user in &r.missing_users {
                out.push_str(&format!("  MISSING user {} of database {}\n", user, r.unit.database_name));
            }
        }
        out.push_str(&format!("  log:         {}\n", self.log_file.display()));
        out.push_str(&format!("  credentials: {}\n", self.credentials_file.display()));
        out.push_str(&format!("  status:      {}\n", self.status_dir.display()));
        out
    }
}
