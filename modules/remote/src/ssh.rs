use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::{shell_quote, CommandOutput, Credential, Direction, Remote, RemoteError, RemoteHost, SyncOptions};

/// [`Remote`] over the system `ssh` and `rsync` binaries.
pub struct SshRemote {
    host: RemoteHost,
}

impl SshRemote {
    pub fn new(host: RemoteHost) -> Self {
        SshRemote { host }
    }

    fn ssh_options(&self) -> Vec<String> {
        let h = &self.host;
        let mut opts = vec![
            "-p".to_string(),
            h.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", h.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ];
        if let Some(kh) = &h.known_hosts {
            opts.push("-o".to_string());
            opts.push(format!("UserKnownHostsFile={}", kh.display()));
        }
        match &h.credential {
            Credential::Password(_) => {
                opts.push("-o".to_string());
                opts.push("PubkeyAuthentication=no".to_string());
            }
            Credential::KeyFile(key) => {
                opts.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "IdentitiesOnly=yes".to_string(),
                    "-i".to_string(),
                    key.display().to_string(),
                ]);
            }
            Credential::Agent => {
                opts.push("-o".to_string());
                opts.push("BatchMode=yes".to_string());
            }
        }
        opts
    }

    /// Prefix `program args` with `sshpass -e` when a password is used.
    fn wrap(&self, program: &str, args: Vec<String>) -> (String, Vec<String>) {
        match self.host.credential {
            Credential::Password(_) => {
                let mut full = vec!["-e".to_string(), program.to_string()];
                full.extend(args);
                ("sshpass".to_string(), full)
            }
            _ => (program.to_string(), args),
        }
    }

    pub fn command_argv(&self, command: &str) -> (String, Vec<String>) {
        let mut args = self.ssh_options();
        args.push(self.host.destination());
        args.push(command.to_string());
        self.wrap("ssh", args)
    }

    fn rsync_shell(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.ssh_options().iter().map(|o| shell_quote(o)));
        parts.join(" ")
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.host.destination(), path)
    }

    pub fn transfer_argv(&self, remote_path: &str, local_path: &Path, direction: Direction) -> (String, Vec<String>) {
        let mut args = vec!["-a".to_string(), "--partial".to_string(), "-e".to_string(), self.rsync_shell()];
        let local = local_path.display().to_string();
        match direction {
            Direction::Pull => {
                args.push(self.remote_spec(remote_path));
                args.push(local);
            }
            Direction::Push => {
                args.push(local);
                args.push(self.remote_spec(remote_path));
            }
        }
        self.wrap("rsync", args)
    }

    pub fn sync_argv(&self, remote_dir: &str, local_dir: &Path, opts: &SyncOptions) -> (String, Vec<String>) {
        let mut args = vec!["-a".to_string()];
        if opts.delete {
            args.push("--delete".to_string());
        }
        // rsync evaluates filters in order: includes must precede excludes
        args.extend(opts.include.iter().map(|p| format!("--include={p}")));
        args.extend(opts.exclude.iter().map(|p| format!("--exclude={p}")));
        args.push("-e".to_string());
        args.push(self.rsync_shell());
        args.push(self.remote_spec(&with_trailing_slash(remote_dir)));
        args.push(with_trailing_slash(&local_dir.display().to_string()));
        self.wrap("rsync", args)
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<CommandOutput, RemoteError> {
        tracing::debug!(program, remote = %self.describe(), "spawning");
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Credential::Password(pw) = &self.host.credential {
            cmd.env("SSHPASS", pw);
        }
        let out = cmd
            .output()
            .await
            .map_err(|source| RemoteError::Spawn { program: program.to_string(), source })?;
        Ok(CommandOutput {
            status: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    fn uses_sshpass(&self) -> bool {
        matches!(self.host.credential, Credential::Password(_))
    }
}

#[async_trait]
impl Remote for SshRemote {
    fn describe(&self) -> String {
        format!("{}:{}", self.host.destination(), self.host.port)
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let (program, args) = self.command_argv(command);
        let out = self.spawn(&program, &args).await?;
        if out.success() {
            return Ok(out);
        }
        Err(classify_failure(&self.host.host, command, &out, self.uses_sshpass(), true))
    }

    async fn transfer_file(&self, remote_path: &str, local_path: &Path, direction: Direction) -> Result<(), RemoteError> {
        let (program, args) = self.transfer_argv(remote_path, local_path, direction);
        let out = self.spawn(&program, &args).await?;
        if out.success() {
            return Ok(());
        }
        Err(classify_failure(&self.host.host, remote_path, &out, self.uses_sshpass(), false))
    }

    async fn sync_tree(&self, remote_dir: &str, local_dir: &Path, opts: &SyncOptions) -> Result<(), RemoteError> {
        let (program, args) = self.sync_argv(remote_dir, local_dir, opts);
        let out = self.spawn(&program, &args).await?;
        if out.success() {
            return Ok(());
        }
        Err(classify_failure(&self.host.host, remote_dir, &out, self.uses_sshpass(), false))
    }
}

fn with_trailing_slash(p: &str) -> String {
    if p.ends_with('/') { p.to_string() } else { format!("{p}/") }
}

/// Map a failed ssh/rsync invocation onto the error taxonomy.
///
/// `is_command` selects between a remote command (`NonZeroExit` fallback) and a
/// transfer (`Transfer` fallback). Connection-level failures win over both.
pub fn classify_failure(host: &str, target: &str, out: &CommandOutput, sshpass: bool, is_command: bool) -> RemoteError {
    let text = out.stderr.to_ascii_lowercase();
    let detail = out.stderr.trim().to_string();
    let host = host.to_string();
    // ssh reports its own failures with 255; remote commands may exit with anything else
    let connection_level = !is_command || out.status == 255 || (sshpass && (out.status == 5 || out.status == 6));

    if connection_level {
        if text.contains("timed out") || (!is_command && (out.status == 30 || out.status == 35)) {
            return RemoteError::Timeout { host, detail };
        }
        let auth_markers = [
            "permission denied (publickey",
            "permission denied, please try again",
            "too many authentication failures",
            "host key verification failed",
            "authentication failed",
        ];
        if auth_markers.iter().any(|m| text.contains(m)) || (sshpass && (out.status == 5 || out.status == 6)) {
            return RemoteError::Auth { host, detail };
        }
    }
    if is_command {
        RemoteError::NonZeroExit {
            command: target.to_string(),
            status: out.status,
            stdout: out.stdout.clone(),
            stderr: detail,
        }
    } else {
        RemoteError::Transfer { path: target.to_string(), status: out.status, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn host(credential: Credential) -> RemoteHost {
        RemoteHost {
            host: "src.example.net".into(),
            port: 2222,
            user: "root".into(),
            credential,
            connect_timeout: Duration::from_secs(10),
            known_hosts: Some(PathBuf::from("/root/site-migrate/known_hosts")),
        }
    }

    #[test]
    fn password_runs_through_sshpass() {
        let r = SshRemote::new(host(Credential::Password("s3cret".into())));
        let (program, args) = r.command_argv("uptime");
        assert_eq!(program, "sshpass");
        assert_eq!(&args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert!(!args.iter().any(|a| a.contains("s3cret")));
        assert!(!args.iter().any(|a| a == "BatchMode=yes"));
        assert_eq!(args.last().unwrap(), "uptime");
        assert!(args.contains(&"root@src.example.net".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
    }

    #[test]
    fn key_auth_is_batch_mode() {
        let r = SshRemote::new(host(Credential::KeyFile("/root/.ssh/id_ed25519".into())));
        let (program, args) = r.command_argv("true");
        assert_eq!(program, "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/root/.ssh/id_ed25519"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
    }

    #[test]
    fn mirrored_sync_argv() {
        let r = SshRemote::new(host(Credential::Agent));
        let opts = SyncOptions {
            delete: true,
            include: vec!["a.example.com.*".into()],
            exclude: vec!["*".into()],
        };
        let (program, args) = r.sync_argv("/etc/nginx/ssl-certificates", Path::new("/etc/nginx/ssl-certificates"), &opts);
        assert_eq!(program, "rsync");
        assert_eq!(args[0], "-a");
        assert_eq!(args[1], "--delete");
        assert_eq!(args[2], "--include=a.example.com.*");
        assert_eq!(args[3], "--exclude=*");
        assert_eq!(args[args.len() - 2], "root@src.example.net:/etc/nginx/ssl-certificates/");
        assert_eq!(args[args.len() - 1], "/etc/nginx/ssl-certificates/");
        let shell = &args[5];
        assert!(shell.starts_with("ssh -p 2222"));
    }

    #[test]
    fn transfer_direction() {
        let r = SshRemote::new(host(Credential::Agent));
        let (_, pull) = r.transfer_argv("/home/a/x.sql.gz", Path::new("/tmp/x.sql.gz"), Direction::Pull);
        assert_eq!(pull[pull.len() - 2], "root@src.example.net:/home/a/x.sql.gz");
        assert_eq!(pull[pull.len() - 1], "/tmp/x.sql.gz");
        let (_, push) = r.transfer_argv("/tmp/remote", Path::new("/tmp/local"), Direction::Push);
        assert_eq!(push[push.len() - 2], "/tmp/local");
        assert_eq!(push[push.len() - 1], "root@src.example.net:/tmp/remote");
    }

    #[test]
    fn classifies_ssh_failures() {
        let timeout = CommandOutput::failed(255, "ssh: connect to host src port 22: Connection timed out\n");
        assert!(matches!(classify_failure("src", "ls", &timeout, false, true), RemoteError::Timeout { .. }));

        let denied = CommandOutput::failed(255, "root@src: Permission denied (publickey,password).\n");
        assert!(matches!(classify_failure("src", "ls", &denied, false, true), RemoteError::Auth { .. }));

        let bad_pw = CommandOutput::failed(5, "");
        assert!(matches!(classify_failure("src", "ls", &bad_pw, true, true), RemoteError::Auth { .. }));

        let exit = CommandOutput::failed(1, "Database not found\n");
        match classify_failure("src", "clpctl db:export", &exit, false, true) {
            RemoteError::NonZeroExit { status, stderr, .. } => {
                assert_eq!(status, 1);
                assert_eq!(stderr, "Database not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_output_mentioning_timeouts_is_still_exit() {
        // the remote command itself failed; ssh connected fine
        let out = CommandOutput::failed(2, "mysqldump: query timed out");
        assert!(matches!(classify_failure("src", "x", &out, false, true), RemoteError::NonZeroExit { .. }));
    }

    #[test]
    fn classifies_rsync_failures() {
        let io_timeout = CommandOutput::failed(30, "rsync error: timeout in data send/receive (code 30)");
        assert!(matches!(classify_failure("src", "/x", &io_timeout, false, false), RemoteError::Timeout { .. }));

        let vanished = CommandOutput::failed(23, "rsync: link_stat \"/x\" failed: No such file or directory (2)");
        assert!(matches!(classify_failure("src", "/x", &vanished, false, false), RemoteError::Transfer { status: 23, .. }));

        let file_perm = CommandOutput::failed(23, "rsync: opendir \"/x\" failed: Permission denied (13)");
        assert!(matches!(classify_failure("src", "/x", &file_perm, false, false), RemoteError::Transfer { .. }));
    }
}
