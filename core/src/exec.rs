//! Local process execution.
//!
//! Every call into a host tool (the provisioning CLI, `useradd`, `gzip`, ...)
//! goes through [`LocalExec`] so the orchestration logic can run against a
//! scripted runner in tests.

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput { status: 0, stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        CommandOutput { status, stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout followed by stderr, for tools that report on either stream.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to feed stdin of {program}: {source}")]
    Stdin {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait LocalExec: Send + Sync {
    /// Run `program` with `args`, optionally writing `input` to its stdin.
    /// A non-zero exit is not an error here; callers inspect `status`.
    fn run_input(&self, program: &str, args: &[String], input: Option<&str>) -> Result<CommandOutput, ExecError>;

    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        self.run_input(program, args, None)
    }
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExec;

impl LocalExec for SystemExec {
    fn run_input(&self, program: &str, args: &[String], input: Option<&str>) -> Result<CommandOutput, ExecError> {
        // arguments may carry passwords; keep them out of the debug log
        tracing::debug!(program, argc = args.len(), "exec");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn { program: program.to_string(), source })?;
        if let Some(text) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(text.as_bytes())
                    .map_err(|source| ExecError::Stdin { program: program.to_string(), source })?;
            }
        }
        let out = child
            .wait_with_output()
            .map_err(|source| ExecError::Spawn { program: program.to_string(), source })?;
        Ok(CommandOutput {
            // killed by signal has no code
            status: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// Build an owned argument vector from string slices.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_status_and_streams() {
        let out = SystemExec
            .run("sh", &argv(&["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[test]
    fn feeds_stdin() {
        let out = SystemExec.run_input("cat", &[], Some("user:secret\n")).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "user:secret\n");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = SystemExec.run("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn combined_joins_streams() {
        let out = CommandOutput { status: 1, stdout: "a".into(), stderr: "b".into() };
        assert_eq!(out.combined(), "a\nb");
        assert_eq!(CommandOutput::failed(2, "boom").combined(), "boom");
    }
}
