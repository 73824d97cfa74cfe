use anyhow::{anyhow, Result};
use migrate_core::{argv, JobLimiter, LocalExec};
use provision::Provisioner;
use remote::{shell_quote, Direction, Remote};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use crate::checksum::{parse_sha256sum, sha256_file};
use crate::{DatabaseUnit, MigrationStatus, StatusStore};

/// One database to export, with the source-host directory the dump goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub unit: DatabaseUnit,
    pub remote_dir: String,
}

impl ExportJob {
    pub fn remote_file(&self) -> String {
        format!("{}/{}.sql.gz", self.remote_dir.trim_end_matches('/'), self.unit.database_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub unit: DatabaseUnit,
    pub status: MigrationStatus,
    pub dump: PathBuf,
    pub detail: Option<String>,
}

/// Everything an export worker needs. Cloned into each spawned task.
#[derive(Clone)]
pub struct Exporter {
    pub remote: Arc<dyn Remote>,
    pub exec: Arc<dyn LocalExec>,
    pub provisioner: Arc<Provisioner>,
    pub status: StatusStore,
    pub staging_dir: PathBuf,
    pub limiter: JobLimiter,
}

struct Failure(MigrationStatus, String);

impl Exporter {
    pub fn staged_path(&self, database: &str) -> PathBuf {
        self.staging_dir.join(format!("{database}.sql.gz"))
    }

    /// Export, pull and verify every job, at most `limiter.limit()` at a time.
    /// Outcomes come back in job order. A database named by more than one job
    /// is exported once, for the first of them.
    pub async fn export_all(&self, jobs: Vec<ExportJob>) -> Result<Vec<ExportOutcome>> {
        std::fs::create_dir_all(&self.staging_dir)?;
        let mut handles = Vec::with_capacity(jobs.len());
        let mut seen = HashSet::new();
        for job in jobs {
            let database = job.unit.database_name.clone();
            if !seen.insert(database.clone()) {
                warn!(database = %database, "database already queued for export, ignoring duplicate");
                continue;
            }
            // a stale OK from an earlier run must not gate this run's import
            if let Err(e) = self.status.write(&database, MigrationStatus::Pending) {
                warn!(database = %database, error = %e, "could not reset status marker");
            }
            let this = self.clone();
            let unit = job.unit.clone();
            let span = tracing::info_span!("export", database = %database);
            let handle = tokio::spawn(async move { this.export_one(job).await }.instrument(span));
            handles.push((unit, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (unit, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome?,
                Err(join) => {
                    error!(database = %unit.database_name, error = %join, "export worker aborted");
                    if let Err(e) = self.status.write(&unit.database_name, MigrationStatus::ExportFailed) {
                        error!(database = %unit.database_name, error = %e, "could not write status marker");
                    }
                    ExportOutcome {
                        dump: self.staged_path(&unit.database_name),
                        unit,
                        status: MigrationStatus::ExportFailed,
                        detail: Some(join.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn export_one(&self, job: ExportJob) -> Result<ExportOutcome> {
        let _slot = self.limiter.acquire().await.map_err(|e| anyhow!("export slots closed: {e}"))?;
        let database = job.unit.database_name.clone();
        let dump = self.staged_path(&database);
        info!(active = self.limiter.active(), "export started");

        let (status, detail) = match self.run_steps(&job, &dump).await {
            Ok(()) => (MigrationStatus::Ok, None),
            Err(Failure(status, detail)) => {
                warn!(status = %status, detail = %detail, "export did not complete");
                (status, Some(detail))
            }
        };
        if let Err(e) = self.status.write(&database, status) {
            error!(error = %e, "could not write status marker");
        }
        info!(status = %status, "export finished");
        Ok(ExportOutcome { unit: job.unit, status, dump, detail })
    }

    async fn run_steps(&self, job: &ExportJob, dump: &Path) -> Result<(), Failure> {
        let database = job.unit.database_name.as_str();
        let remote_file = job.remote_file();

        let export = format!(
            "mkdir -p {} && {}",
            shell_quote(&job.remote_dir),
            self.provisioner.export_command(database, &remote_file)
        );
        match self.remote.run_command(&export).await {
            Ok(out) if out.success() => {}
            Ok(out) => return Err(Failure(MigrationStatus::ExportFailed, out.combined().trim().to_string())),
            Err(e) => return Err(Failure(MigrationStatus::ExportFailed, e.to_string())),
        }

        let copy_failed = |detail: String| Failure(MigrationStatus::CopyFailed, detail);
        let remote_sum = self
            .remote
            .run_command(&format!("sha256sum {}", shell_quote(&remote_file)))
            .await
            .map_err(|e| copy_failed(e.to_string()))
            .and_then(|out| parse_sha256sum(&out.stdout).map_err(|e| copy_failed(e.to_string())))?;
        self.remote
            .transfer_file(&remote_file, dump, Direction::Pull)
            .await
            .map_err(|e| copy_failed(e.to_string()))?;

        let staged = dump.to_path_buf();
        let local_sum = tokio::task::spawn_blocking(move || sha256_file(&staged))
            .await
            .map_err(|e| copy_failed(e.to_string()))?
            .map_err(|e| copy_failed(format!("hashing staged dump: {e}")))?;
        if local_sum != remote_sum {
            return Err(copy_failed(format!("checksum mismatch: remote {remote_sum}, local {local_sum}")));
        }

        let exec = self.exec.clone();
        let args = argv(&["-t", &dump.display().to_string()]);
        let check = tokio::task::spawn_blocking(move || exec.run("gzip", &args))
            .await
            .map_err(|e| Failure(MigrationStatus::IntegrityFailed, e.to_string()))?;
        match check {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(Failure(MigrationStatus::IntegrityFailed, out.combined().trim().to_string())),
            Err(e) => Err(Failure(MigrationStatus::IntegrityFailed, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_core::CommandOutput;
    use migrate_test_support::{FakeHost, FakeSource};
    use std::time::Duration;

    fn job(db: &str) -> ExportJob {
        ExportJob {
            unit: DatabaseUnit {
                domain_name: "a.example.com".into(),
                database_name: db.into(),
                owner: format!("{db}_user"),
                extra_users: Vec::new(),
            },
            remote_dir: "/home/a/backups".into(),
        }
    }

    fn exporter(dir: &Path, source: Arc<FakeSource>, fake: Arc<FakeHost>, max_jobs: usize) -> Exporter {
        Exporter {
            remote: source,
            exec: fake.clone(),
            provisioner: Arc::new(Provisioner::new(fake, "clpctl")),
            status: StatusStore::open(dir.join("status")).unwrap(),
            staging_dir: dir.join("staging"),
            limiter: JobLimiter::new(max_jobs),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(None).with_export_delay(Duration::from_millis(40)));
        let ex = exporter(dir.path(), source.clone(), Arc::new(FakeHost::new("clpctl")), 2);

        let jobs: Vec<_> = (0..7).map(|i| job(&format!("db{i}"))).collect();
        let outcomes = ex.export_all(jobs).await.unwrap();

        assert_eq!(outcomes.len(), 7);
        assert_eq!(outcomes[3].unit.database_name, "db3");
        assert!(outcomes.iter().all(|o| o.status == MigrationStatus::Ok));
        assert!(source.max_overlap() <= 2);
        assert!(source.peak_exports() <= 2);
        assert!(ex.limiter.peak() <= 2);
        assert_eq!(ex.status.read("db6").unwrap(), Some(MigrationStatus::Ok));
        assert!(outcomes[0].dump.exists());
    }

    #[tokio::test]
    async fn each_stage_has_its_own_marker() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(None));
        source.fail_export("x_db");
        source.fail_transfer("y_db");
        source.corrupt("z_db");
        let fake = Arc::new(FakeHost::new("clpctl"));
        fake.fail_on("gzip", "w_db", CommandOutput::failed(1, "gzip: w_db.sql.gz: unexpected end of file"));
        let ex = exporter(dir.path(), source.clone(), fake, 3);

        let outcomes = ex.export_all(vec![job("x_db"), job("y_db"), job("z_db"), job("w_db"), job("ok_db")]).await.unwrap();
        let got: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            got,
            vec![
                MigrationStatus::ExportFailed,
                MigrationStatus::CopyFailed,
                MigrationStatus::CopyFailed,
                MigrationStatus::IntegrityFailed,
                MigrationStatus::Ok,
            ]
        );
        assert_eq!(ex.status.read("x_db").unwrap(), Some(MigrationStatus::ExportFailed));
        assert!(outcomes[2].detail.as_deref().unwrap().contains("checksum mismatch"));
        assert!(source.commands().iter().any(|c| c.starts_with("mkdir -p /home/a/backups && clpctl db:export")));
    }

    #[tokio::test]
    async fn stale_ok_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(None));
        source.fail_export("a_db");
        let ex = exporter(dir.path(), source, Arc::new(FakeHost::new("clpctl")), 1);
        ex.status.write("a_db", MigrationStatus::Ok).unwrap();

        ex.export_all(vec![job("a_db")]).await.unwrap();
        assert_eq!(ex.status.read("a_db").unwrap(), Some(MigrationStatus::ExportFailed));
    }

    #[tokio::test]
    async fn duplicate_database_is_exported_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(None));
        let ex = exporter(dir.path(), source.clone(), Arc::new(FakeHost::new("clpctl")), 2);

        let outcomes = ex.export_all(vec![job("a_db"), job("a_db"), job("b_db")]).await.unwrap();
        let names: Vec<_> = outcomes.iter().map(|o| o.unit.database_name.as_str()).collect();
        assert_eq!(names, vec!["a_db", "b_db"]);
        let exports = source.commands().iter().filter(|c| c.contains("--databaseName=a_db")).count();
        assert_eq!(exports, 1);
        assert_eq!(ex.status.read("a_db").unwrap(), Some(MigrationStatus::Ok));
    }

    #[tokio::test]
    async fn crashed_worker_marks_export_failed() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(None));
        source.crash_export("a_db");
        let ex = exporter(dir.path(), source, Arc::new(FakeHost::new("clpctl")), 2);

        let outcomes = ex.export_all(vec![job("a_db"), job("b_db")]).await.unwrap();
        assert_eq!(outcomes[0].status, MigrationStatus::ExportFailed);
        assert!(outcomes[0].detail.as_deref().unwrap().contains("panic"));
        assert_eq!(ex.status.read("a_db").unwrap(), Some(MigrationStatus::ExportFailed));
        assert_eq!(outcomes[1].status, MigrationStatus::Ok);
    }
}
