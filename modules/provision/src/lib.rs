//! Wrapper around the control panel's provisioning CLI.
//!
//! Only argument construction and result interpretation live here; the tool
//! itself does the work.

use migrate_core::{CommandOutput, ExecError, LocalExec};
use remote::shell_quote;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

mod cert;
mod defaults;

pub use cert::{classify_certificate_output, CertOutcome};
pub use defaults::{user_from_domain, Fallback, FallbackPolicy, ResolvedSite};

pub const DEFAULT_TOOL: &str = "clpctl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRequest {
    pub domain: String,
    pub php_version: String,
    pub vhost_template: String,
    pub site_user: String,
    pub site_user_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRequest {
    pub domain: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseCreate {
    Created,
    /// The tool refused because the database is already there.
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{action} failed with status {status}: {output}")]
    Failed { action: &'static str, status: i32, output: String },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

pub struct Provisioner {
    exec: Arc<dyn LocalExec>,
    tool: String,
}

impl Provisioner {
    pub fn new(exec: Arc<dyn LocalExec>, tool: impl Into<String>) -> Self {
        Provisioner { exec, tool: tool.into() }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    fn invoke(&self, action: &'static str, args: Vec<String>) -> Result<CommandOutput, ProvisionError> {
        let out = self.exec.run(&self.tool, &args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(ProvisionError::Failed { action, status: out.status, output: out.combined().trim().to_string() })
        }
    }

    pub fn create_site(&self, req: &SiteRequest) -> Result<CommandOutput, ProvisionError> {
        tracing::info!(domain = %req.domain, php = %req.php_version, user = %req.site_user, "creating site");
        self.invoke("site:add:php", site_add_args(req))
    }

    pub fn create_database(&self, req: &DatabaseRequest) -> Result<DatabaseCreate, ProvisionError> {
        match self.invoke("db:add", db_add_args(req)) {
            Ok(_) => Ok(DatabaseCreate::Created),
            Err(ProvisionError::Failed { output, .. }) if mentions_existing(&output) => Ok(DatabaseCreate::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    pub fn import_database(&self, database: &str, dump: &Path) -> Result<CommandOutput, ProvisionError> {
        self.invoke(
            "db:import",
            vec![
                "db:import".to_string(),
                format!("--databaseName={database}"),
                format!("--file={}", dump.display()),
            ],
        )
    }

    /// Ask the tool for a certificate. The exit status alone is not trusted.
    pub fn issue_certificate(&self, domain: &str) -> Result<CertOutcome, ProvisionError> {
        let args = vec!["lets-encrypt:install:certificate".to_string(), format!("--domainName={domain}")];
        let out = self.exec.run(&self.tool, &args)?;
        Ok(classify_certificate_output(out.status, &out.combined()))
    }

    /// Shell command that exports `database` to `file` when run on the source host.
    pub fn export_command(&self, database: &str, file: &str) -> String {
        [
            shell_quote(&self.tool),
            "db:export".to_string(),
            shell_quote(&format!("--databaseName={database}")),
            shell_quote(&format!("--file={file}")),
        ]
        .join(" ")
    }
}

fn site_add_args(req: &SiteRequest) -> Vec<String> {
    vec![
        "site:add:php".to_string(),
        format!("--domainName={}", req.domain),
        format!("--phpVersion={}", req.php_version),
        format!("--vhostTemplate={}", req.vhost_template),
        format!("--siteUser={}", req.site_user),
        format!("--siteUserPassword={}", req.site_user_password),
    ]
}

fn db_add_args(req: &DatabaseRequest) -> Vec<String> {
    vec![
        "db:add".to_string(),
        format!("--domainName={}", req.domain),
        format!("--databaseName={}", req.database),
        format!("--databaseUserName={}", req.user),
        format!("--databaseUserPassword={}", req.password),
    ]
}

fn mentions_existing(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("already exists") || lower.contains("already exist")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        reply: CommandOutput,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl LocalExec for Scripted {
        fn run_input(&self, program: &str, args: &[String], _input: Option<&str>) -> Result<CommandOutput, ExecError> {
            self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
            Ok(self.reply.clone())
        }
    }

    fn provisioner(reply: CommandOutput) -> (Arc<Scripted>, Provisioner) {
        let exec = Arc::new(Scripted { reply, calls: Mutex::new(Vec::new()) });
        let p = Provisioner::new(exec.clone(), DEFAULT_TOOL);
        (exec, p)
    }

    #[test]
    fn site_arguments() {
        let (exec, p) = provisioner(CommandOutput::ok("Site has been created."));
        let req = SiteRequest {
            domain: "a.example.com".into(),
            php_version: "8.2".into(),
            vhost_template: "Generic".into(),
            site_user: "a".into(),
            site_user_password: "pw".into(),
        };
        p.create_site(&req).unwrap();
        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls[0].0, "clpctl");
        assert_eq!(
            calls[0].1,
            vec![
                "site:add:php",
                "--domainName=a.example.com",
                "--phpVersion=8.2",
                "--vhostTemplate=Generic",
                "--siteUser=a",
                "--siteUserPassword=pw"
            ]
        );
    }

    #[test]
    fn failed_site_creation_carries_output() {
        let (_exec, p) = provisioner(CommandOutput::failed(1, "Domain is invalid\n"));
        let req = SiteRequest {
            domain: "bad".into(),
            php_version: "7.4".into(),
            vhost_template: "Generic".into(),
            site_user: "bad".into(),
            site_user_password: "pw".into(),
        };
        match p.create_site(&req).unwrap_err() {
            ProvisionError::Failed { action, status, output } => {
                assert_eq!(action, "site:add:php");
                assert_eq!(status, 1);
                assert_eq!(output, "Domain is invalid");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn existing_database_is_distinguished() {
        let req = DatabaseRequest {
            domain: "a.example.com".into(),
            database: "a_db".into(),
            user: "a_user".into(),
            password: "pw".into(),
        };
        let (_e, p) = provisioner(CommandOutput::failed(1, "Database \"a_db\" already exists."));
        assert_eq!(p.create_database(&req).unwrap(), DatabaseCreate::AlreadyExists);
        let (_e, p) = provisioner(CommandOutput::failed(1, "Access denied"));
        assert!(p.create_database(&req).is_err());
        let (_e, p) = provisioner(CommandOutput::ok(""));
        assert_eq!(p.create_database(&req).unwrap(), DatabaseCreate::Created);
    }

    #[test]
    fn export_command_is_quoted() {
        let (_e, p) = provisioner(CommandOutput::ok(""));
        assert_eq!(
            p.export_command("a_db", "/home/a/backups/migration/a_db.sql.gz"),
            "clpctl db:export --databaseName=a_db --file=/home/a/backups/migration/a_db.sql.gz"
        );
        assert_eq!(
            p.export_command("a db", "/tmp/x y.sql.gz"),
            "clpctl db:export '--databaseName=a db' '--file=/tmp/x y.sql.gz'"
        );
    }

    #[test]
    fn certificate_ignores_exit_status() {
        let (_e, p) = provisioner(CommandOutput::ok("Error: Challenge failed for domain a.example.com"));
        assert!(matches!(p.issue_certificate("a.example.com").unwrap(), CertOutcome::Failed(_)));
    }
}
