use credentials::{generate_password, CredentialKind, CredentialLog, CredentialRecord};
use inventory_sqlite::{DestinationInventory, InventoryRead, Site, SiteId};
use provision::{FallbackPolicy, ProvisionError, Provisioner};
use thiserror::Error;
use tracing::{info, warn};

/// `NeedsCreate -> Created -> Reconciled`. A site already present at the
/// destination starts at `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    NeedsCreate,
    Created,
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedSite {
    pub dest_id: SiteId,
    pub user: String,
    /// Whether this run created the site.
    pub created: bool,
    pub state: SiteState,
    /// Set when the metadata update failed; the site is still usable.
    pub reconcile_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("creating {domain} failed: {source}")]
    Create {
        domain: String,
        #[source]
        source: ProvisionError,
    },
    #[error("{domain} is not in the destination inventory after creation")]
    Missing { domain: String },
    #[error("destination inventory: {0:#}")]
    Inventory(anyhow::Error),
    #[error("credential log: {0:#}")]
    Credential(anyhow::Error),
}

pub struct SiteProvisioner<'a> {
    pub dest: &'a DestinationInventory,
    pub provisioner: &'a Provisioner,
    pub policy: &'a FallbackPolicy,
    pub credentials: &'a CredentialLog,
}

impl SiteProvisioner<'_> {
    pub fn state_of(&self, site: &Site) -> Result<SiteState, SiteError> {
        let existing = self.dest.site_id_by_domain(&site.domain_name).map_err(SiteError::Inventory)?;
        Ok(if existing.is_some() { SiteState::Created } else { SiteState::NeedsCreate })
    }

    /// Create the site if the destination lacks it, then copy the reconciled
    /// metadata onto the destination record.
    pub fn provision(&self, site: &Site) -> Result<ProvisionedSite, SiteError> {
        let domain = site.domain_name.as_str();
        let mut state = self.state_of(site)?;
        let mut created = false;
        let mut fallback_user = None;

        if state == SiteState::NeedsCreate {
            let resolved = self.policy.resolve(site, generate_password);
            if !resolved.applied.is_empty() {
                info!(domain, fallbacks = ?resolved.applied, "using fallback values for site creation");
            }
            if resolved.generated_password() {
                self.credentials
                    .record(&CredentialRecord {
                        kind: CredentialKind::SiteUser,
                        domain,
                        user: &resolved.request.site_user,
                        database: None,
                        password: &resolved.request.site_user_password,
                    })
                    .map_err(SiteError::Credential)?;
            }
            self.provisioner
                .create_site(&resolved.request)
                .map_err(|source| SiteError::Create { domain: domain.to_string(), source })?;
            fallback_user = Some(resolved.request.site_user);
            created = true;
            state = SiteState::Created;
        } else {
            info!(domain, "site already exists at destination, skipping creation");
        }

        let dest_site = self
            .dest
            .site_by_domain(domain)
            .map_err(SiteError::Inventory)?
            .ok_or_else(|| SiteError::Missing { domain: domain.to_string() })?;
        let user = if dest_site.user.is_empty() {
            fallback_user.unwrap_or_else(|| site.user.clone())
        } else {
            dest_site.user.clone()
        };

        let reconcile_error = match self.dest.update_site_metadata(dest_site.id, &site.metadata()) {
            Ok(()) => {
                state = SiteState::Reconciled;
                None
            }
            Err(e) => {
                warn!(domain, error = %e, "could not reconcile site metadata");
                Some(e.to_string())
            }
        };

        Ok(ProvisionedSite { dest_id: dest_site.id, user, created, state, reconcile_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_core::CommandOutput;
    use migrate_test_support::{FakeHost, InventoryFixture};
    use std::sync::Arc;

    struct Env {
        _dir: tempfile::TempDir,
        fake: Arc<FakeHost>,
        dest: DestinationInventory,
        provisioner: Provisioner,
        creds: CredentialLog,
        source: InventoryFixture,
    }

    fn env() -> Env {
        let dir = tempfile::tempdir().unwrap();
        let dest_path = dir.path().join("dst.sq3");
        InventoryFixture::create(&dest_path).unwrap();
        let source = InventoryFixture::create(dir.path().join("src.sq3")).unwrap();
        let fake = Arc::new(FakeHost::new("clpctl").with_inventory(&dest_path));
        let provisioner = Provisioner::new(fake.clone(), "clpctl");
        let creds = CredentialLog::open(dir.path().join("credentials.log")).unwrap();
        let dest = DestinationInventory::open(&dest_path).unwrap();
        Env { _dir: dir, fake, dest, provisioner, creds, source }
    }

    fn source_site(env: &Env, domain: &str, password: &str) -> Site {
        env.source.site(domain, "a", password, Some("8.1")).unwrap();
        let inv = inventory_sqlite::SourceInventory::open(env.source.path()).unwrap();
        inv.site_by_domain(domain).unwrap().unwrap()
    }

    #[test]
    fn creates_then_reconciles() {
        let env = env();
        let site = source_site(&env, "a.example.com", "pw");
        let policy = FallbackPolicy::default();
        let sp = SiteProvisioner { dest: &env.dest, provisioner: &env.provisioner, policy: &policy, credentials: &env.creds };

        assert_eq!(sp.state_of(&site).unwrap(), SiteState::NeedsCreate);
        let p = sp.provision(&site).unwrap();
        assert!(p.created);
        assert_eq!(p.state, SiteState::Reconciled);
        assert_eq!(p.user, "a");

        let dest_site = env.dest.site_by_domain("a.example.com").unwrap().unwrap();
        assert_eq!(dest_site.id, p.dest_id);
        assert_eq!(dest_site.vhost_template.as_deref(), Some("WordPress"));
        assert_eq!(dest_site.application.as_deref(), Some("wordpress"));
        assert_eq!(dest_site.varnish_cache, Some(true));
    }

    #[test]
    fn existing_site_is_not_recreated() {
        let env = env();
        let site = source_site(&env, "a.example.com", "pw");
        let policy = FallbackPolicy::default();
        let sp = SiteProvisioner { dest: &env.dest, provisioner: &env.provisioner, policy: &policy, credentials: &env.creds };
        let first = sp.provision(&site).unwrap();
        let second = sp.provision(&site).unwrap();
        assert!(!second.created);
        assert_eq!(first.dest_id, second.dest_id);
        assert_eq!(env.fake.count("clpctl", "site:add:php"), 1);
    }

    #[test]
    fn generated_site_password_is_logged_before_creation() {
        let env = env();
        let site = source_site(&env, "a.example.com", "");
        env.fake.fail_on("clpctl", "site:add:php", CommandOutput::failed(1, "Site creation failed"));
        let policy = FallbackPolicy::default();
        let sp = SiteProvisioner { dest: &env.dest, provisioner: &env.provisioner, policy: &policy, credentials: &env.creds };

        let err = sp.provision(&site).unwrap_err();
        assert!(matches!(err, SiteError::Create { .. }));
        let log = std::fs::read_to_string(env.creds.path()).unwrap();
        assert!(log.contains("kind=site site=a.example.com user=a password="));
    }
}
