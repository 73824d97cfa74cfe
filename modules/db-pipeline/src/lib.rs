//! Two-phase database migration.
//!
//! Bindings are first grouped into one [`DatabaseUnit`] per database name.
//! Exports run in parallel under a [`migrate_core::JobLimiter`]; each worker
//! ends by writing its database's status marker. Creation and import then run
//! one at a time, and only for databases whose marker reads `OK`.

mod checksum;
mod export;
mod import;
mod status;
mod unit;

pub use checksum::{parse_sha256sum, sha256_file};
pub use export::{ExportJob, ExportOutcome, Exporter};
pub use import::{ExistingDatabasePolicy, ImportOutcome, ImportResult, Importer};
pub use status::{MigrationStatus, StatusStore, UnknownStatus};
pub use unit::{group_bindings, DatabaseUnit};
