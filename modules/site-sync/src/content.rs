use provision::{CertOutcome, Provisioner};
use remote::{Direction, Remote, SyncOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{HostOps, SiteContext};

/// Where the panel keeps site content. Both hosts run the same panel, so the
/// layout is shared by source and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    pub vhost_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub home_root: PathBuf,
}

impl ContentLayout {
    pub fn vhost_file(&self, domain: &str) -> PathBuf {
        self.vhost_dir.join(format!("{domain}.conf"))
    }

    pub fn web_root(&self, user: &str, domain: &str) -> PathBuf {
        self.home_root.join(user).join("htdocs").join(domain)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentReport {
    pub vhost_ok: bool,
    pub ssl_ok: bool,
    pub web_root_ok: bool,
    pub certificate: Option<CertOutcome>,
}

impl ContentReport {
    pub fn warnings(&self) -> usize {
        [self.vhost_ok, self.ssl_ok, self.web_root_ok].iter().filter(|ok| !**ok).count()
    }
}

fn remote_path(p: &Path) -> String {
    p.display().to_string()
}

/// Copy the vhost definition, the site's certificate files and its web root.
///
/// Each copy is independent: a failure is logged and the next one still runs.
/// `issuer` requests a fresh certificate when the certificate sync fails.
pub async fn replicate_content(
    remote: &dyn Remote,
    host: &HostOps,
    layout: &ContentLayout,
    ctx: &SiteContext,
    issuer: Option<&Provisioner>,
) -> ContentReport {
    let mut report = ContentReport::default();
    let domain = ctx.domain.as_str();

    let vhost = layout.vhost_file(domain);
    match remote.transfer_file(&remote_path(&vhost), &vhost, Direction::Pull).await {
        Ok(()) => report.vhost_ok = true,
        Err(e) => warn!(domain, kind = e.kind(), error = %e, "vhost copy failed"),
    }

    report.ssl_ok = sync_certificates(remote, host, layout, domain).await;
    if !report.ssl_ok {
        if let Some(p) = issuer {
            let outcome = match p.issue_certificate(domain) {
                Ok(o) => o,
                Err(e) => CertOutcome::Failed(e.to_string()),
            };
            match &outcome {
                CertOutcome::Issued => info!(domain, "certificate issued"),
                other => warn!(domain, outcome = ?other, "certificate issuance did not succeed"),
            }
            report.certificate = Some(outcome);
        }
    }

    let local_root = layout.web_root(&ctx.user, domain);
    let source_root = layout.web_root(&ctx.source_user, domain);
    let mut ready = true;
    if !local_root.exists() {
        if let Err(e) = host.ensure_dir(&local_root, &ctx.user, &ctx.user) {
            warn!(domain, error = %e, "could not prepare web root");
            ready = false;
        }
    }
    if ready {
        match remote.sync_tree(&remote_path(&source_root), &local_root, &SyncOptions::mirrored()).await {
            Ok(()) => {
                info!(domain, path = %local_root.display(), "web root synced");
                report.web_root_ok = true;
            }
            Err(e) => warn!(domain, kind = e.kind(), error = %e, "web root sync failed"),
        }
    }
    report
}

async fn sync_certificates(remote: &dyn Remote, host: &HostOps, layout: &ContentLayout, domain: &str) -> bool {
    if !layout.ssl_dir.exists() {
        if let Err(e) = host.ensure_dir(&layout.ssl_dir, "root", "root") {
            warn!(domain, error = %e, "could not prepare certificate directory");
            return false;
        }
    }
    // only this site's files; other sites' certificates are excluded and so never deleted
    let opts = SyncOptions {
        delete: true,
        include: vec![format!("{domain}.*")],
        exclude: vec!["*".to_string()],
    };
    match remote.sync_tree(&remote_path(&layout.ssl_dir), &layout.ssl_dir, &opts).await {
        Ok(()) => true,
        Err(e) => {
            warn!(domain, kind = e.kind(), error = %e, "certificate sync failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_test_support::{FakeHost, FakeSource};
    use std::sync::Arc;

    fn ctx() -> SiteContext {
        SiteContext {
            domain: "a.example.com".into(),
            source_id: 7,
            dest_id: 1,
            user: "a".into(),
            source_user: "a".into(),
        }
    }

    fn layout(root: &Path) -> ContentLayout {
        ContentLayout {
            vhost_dir: root.join("sites-enabled"),
            ssl_dir: root.join("ssl-certificates"),
            home_root: root.join("home"),
        }
    }

    #[tokio::test]
    async fn copies_all_three() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let source = FakeSource::new(None);
        let fake = Arc::new(FakeHost::new("clpctl"));
        let host = HostOps::new(fake.clone());

        let report = replicate_content(&source, &host, &layout, &ctx(), None).await;
        assert_eq!(report.warnings(), 0);
        assert!(layout.vhost_file("a.example.com").exists());

        let syncs = source.syncs();
        assert_eq!(syncs.len(), 2);
        assert_eq!(syncs[0].2.include, vec!["a.example.com.*".to_string()]);
        assert!(syncs[0].2.delete);
        assert_eq!(syncs[1].1, layout.web_root("a", "a.example.com"));
        assert!(syncs[1].2.delete);
        // missing web root gets created with the site owner first
        assert!(fake.calls().iter().any(|c| c.program == "chown" && c.args[0] == "a:a"));
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let source = FakeSource::new(None);
        source.fail_transfer(".conf");
        source.fail_sync("ssl-certificates");
        let fake = Arc::new(FakeHost::new("clpctl"));
        let host = HostOps::new(fake.clone());
        let issuer = Provisioner::new(fake.clone(), "clpctl");

        let report = replicate_content(&source, &host, &layout, &ctx(), Some(&issuer)).await;
        assert!(!report.vhost_ok);
        assert!(!report.ssl_ok);
        assert!(report.web_root_ok);
        assert_eq!(report.certificate, Some(CertOutcome::Issued));
        assert_eq!(report.warnings(), 2);
    }
}
