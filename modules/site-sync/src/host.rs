use anyhow::{bail, Result};
use migrate_core::{argv, CommandOutput, LocalExec};
use std::path::Path;
use std::sync::Arc;

/// OS account, directory and service primitives on the local host.
#[derive(Clone)]
pub struct HostOps {
    exec: Arc<dyn LocalExec>,
}

fn check(out: CommandOutput, what: &str) -> Result<()> {
    if out.success() {
        Ok(())
    } else {
        bail!("{} failed with status {}: {}", what, out.status, out.combined().trim())
    }
}

impl HostOps {
    pub fn new(exec: Arc<dyn LocalExec>) -> Self {
        HostOps { exec }
    }

    /// Whether the system knows an account with this name.
    pub fn user_exists(&self, name: &str) -> Result<bool> {
        let out = self.exec.run("id", &argv(&["-u", name]))?;
        Ok(out.success())
    }

    /// Create a login-less account without creating its home directory.
    pub fn create_user(&self, name: &str, home: &Path, primary_group: &str) -> Result<()> {
        let home = home.display().to_string();
        let out = self.exec.run(
            "useradd",
            &argv(&["--no-create-home", "--home-dir", &home, "--gid", primary_group, "--shell", "/usr/sbin/nologin", name]),
        )?;
        check(out, "useradd")
    }

    pub fn set_password(&self, name: &str, password: &str) -> Result<()> {
        let out = self.exec.run_input("chpasswd", &[], Some(&format!("{name}:{password}\n")))?;
        check(out, "chpasswd")
    }

    pub fn set_home(&self, name: &str, home: &Path) -> Result<()> {
        let out = self.exec.run("usermod", &argv(&["--home", &home.display().to_string(), name]))?;
        check(out, "usermod --home")
    }

    /// Add supplementary groups, keeping the ones the account already has.
    pub fn add_groups(&self, name: &str, groups: &[&str]) -> Result<()> {
        let out = self.exec.run("usermod", &argv(&["--append", "--groups", &groups.join(","), name]))?;
        check(out, "usermod --groups")
    }

    /// Create `path` (and parents) and hand the leaf to `owner:group`.
    pub fn ensure_dir(&self, path: &Path, owner: &str, group: &str) -> Result<()> {
        let p = path.display().to_string();
        check(self.exec.run("mkdir", &argv(&["-p", &p]))?, "mkdir")?;
        check(self.exec.run("chown", &argv(&[&format!("{owner}:{group}"), &p]))?, "chown")
    }

    pub fn restart_service(&self, service: &str) -> Result<()> {
        check(self.exec.run("systemctl", &argv(&["restart", service]))?, "systemctl restart")
    }

    pub fn reload_service(&self, service: &str) -> Result<()> {
        check(self.exec.run("systemctl", &argv(&["reload", service]))?, "systemctl reload")
    }
}
