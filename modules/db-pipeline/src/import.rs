use credentials::{generate_password, CredentialKind, CredentialLog, CredentialRecord};
use provision::{DatabaseCreate, DatabaseRequest, Provisioner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{DatabaseUnit, MigrationStatus, StatusStore};

/// What to do when the destination already has a database of the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingDatabasePolicy {
    /// Import into it anyway.
    #[default]
    Import,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported,
    /// Marker was not `OK`; nothing was created.
    NotReady(Option<MigrationStatus>),
    CreateFailed(String),
    SkippedExisting,
    ImportFailed(String),
}

impl ImportOutcome {
    /// Whether an import was attempted at all.
    pub fn attempted(&self) -> bool {
        matches!(self, ImportOutcome::Imported | ImportOutcome::ImportFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub unit: DatabaseUnit,
    pub outcome: ImportOutcome,
    pub created: bool,
    /// Source users of this database that do not exist at the destination.
    pub missing_users: Vec<String>,
}

/// Sequential create-and-import. Every call blocks on the panel tool, so run
/// it off the async workers.
pub struct Importer {
    pub provisioner: Arc<Provisioner>,
    pub status: StatusStore,
    pub credentials: Arc<CredentialLog>,
    pub policy: ExistingDatabasePolicy,
}

impl Importer {
    /// Create and import each staged dump in order, one at a time.
    pub fn import_all(&self, staged: &[(DatabaseUnit, PathBuf)]) -> Vec<ImportResult> {
        staged
            .iter()
            .map(|(unit, dump)| {
                let span = tracing::info_span!("import", database = %unit.database_name);
                let _g = span.enter();
                self.import_one(unit, dump)
            })
            .collect()
    }

    pub fn import_one(&self, unit: &DatabaseUnit, dump: &Path) -> ImportResult {
        let database = unit.database_name.as_str();
        let result = |outcome, created| ImportResult {
            unit: unit.clone(),
            outcome,
            created,
            missing_users: Vec::new(),
        };

        let marker = match self.status.read(database) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "unreadable status marker");
                None
            }
        };
        if marker != Some(MigrationStatus::Ok) {
            info!(marker = ?marker.map(|m| m.as_str()), "not ready, skipping import");
            return result(ImportOutcome::NotReady(marker), false);
        }

        let req = DatabaseRequest {
            domain: unit.domain_name.clone(),
            database: unit.database_name.clone(),
            user: unit.owner.clone(),
            password: generate_password(),
        };
        let created = match self.provisioner.create_database(&req) {
            Ok(DatabaseCreate::Created) => {
                // the database and user exist now, so the password is live
                if let Err(e) = self.credentials.record(&CredentialRecord {
                    kind: CredentialKind::Database,
                    domain: &req.domain,
                    user: &req.user,
                    database: Some(&req.database),
                    password: &req.password,
                }) {
                    error!(user = %req.user, error = %format!("{e:#}"), "database credential not logged");
                }
                info!(user = %req.user, "database created");
                true
            }
            Ok(DatabaseCreate::AlreadyExists) => {
                if self.policy == ExistingDatabasePolicy::Skip {
                    info!("database already exists, skipping import");
                    return result(ImportOutcome::SkippedExisting, false);
                }
                warn!("database already exists, importing into it");
                false
            }
            Err(e) => {
                warn!(error = %e, "database creation failed");
                return result(ImportOutcome::CreateFailed(e.to_string()), false);
            }
        };

        // the panel creates one user per database
        for user in &unit.extra_users {
            warn!(user = %user, "database user not created at the destination, grant it by hand");
        }

        let outcome = match self.provisioner.import_database(database, dump) {
            Ok(_) => {
                info!(dump = %dump.display(), "database imported");
                ImportOutcome::Imported
            }
            Err(e) => {
                warn!(error = %e, "import failed");
                ImportOutcome::ImportFailed(e.to_string())
            }
        };
        ImportResult { missing_users: unit.extra_users.clone(), ..result(outcome, created) }
    }
}
