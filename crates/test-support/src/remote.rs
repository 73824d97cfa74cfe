use async_trait::async_trait;
use remote::{CommandOutput, Direction, Remote, RemoteError, SyncOptions};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remote path the fake serves the inventory snapshot from.
pub const SOURCE_INVENTORY_PATH: &str = "/home/clp/htdocs/app/data/db.sq3";

#[derive(Default)]
struct SourceState {
    commands: Vec<String>,
    transfers: Vec<(String, PathBuf)>,
    syncs: Vec<(String, PathBuf, SyncOptions)>,
    export_spans: Vec<(String, Instant, Instant)>,
    failing_exports: HashSet<String>,
    crashing_exports: HashSet<String>,
    failing_transfers: HashSet<String>,
    failing_syncs: HashSet<String>,
    corrupt: HashSet<String>,
}

/// Scripted source host. Exports succeed unless told otherwise and every
/// pulled dump has the same content.
pub struct FakeSource {
    snapshot: Option<PathBuf>,
    dump: Vec<u8>,
    export_delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn new(snapshot: Option<PathBuf>) -> Self {
        FakeSource {
            snapshot,
            dump: b"-- dump\nCREATE TABLE t (id int);\n".to_vec(),
            export_delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn with_export_delay(mut self, delay: Duration) -> Self {
        self.export_delay = delay;
        self
    }

    pub fn fail_export(&self, database: &str) {
        self.state.lock().unwrap().failing_exports.insert(database.to_string());
    }

    /// Panic inside the export of `database`, as a broken worker would.
    pub fn crash_export(&self, database: &str) {
        self.state.lock().unwrap().crashing_exports.insert(database.to_string());
    }

    /// Any transfer whose remote path contains `needle` fails.
    pub fn fail_transfer(&self, needle: &str) {
        self.state.lock().unwrap().failing_transfers.insert(needle.to_string());
    }

    pub fn fail_sync(&self, needle: &str) {
        self.state.lock().unwrap().failing_syncs.insert(needle.to_string());
    }

    /// Report a wrong checksum for remote paths containing `needle`.
    pub fn corrupt(&self, needle: &str) {
        self.state.lock().unwrap().corrupt.insert(needle.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn transfers(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn syncs(&self) -> Vec<(String, PathBuf, SyncOptions)> {
        self.state.lock().unwrap().syncs.clone()
    }

    /// Highest number of exports observed running at the same time.
    pub fn peak_exports(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Maximum overlap computed from recorded export start/end instants.
    pub fn max_overlap(&self) -> usize {
        let spans = self.state.lock().unwrap().export_spans.clone();
        let mut events: Vec<(Instant, i32)> = Vec::new();
        for (_, start, end) in spans {
            events.push((start, 1));
            events.push((end, -1));
        }
        // ends sort before starts at the same instant
        events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let (mut cur, mut max) = (0i32, 0i32);
        for (_, d) in events {
            cur += d;
            max = max.max(cur);
        }
        max as usize
    }

    pub fn exported(&self) -> Vec<String> {
        self.state.lock().unwrap().export_spans.iter().map(|(db, _, _)| db.clone()).collect()
    }

    fn host(&self) -> String {
        "source.test".to_string()
    }
}

fn database_of(command: &str) -> Option<String> {
    command
        .split_whitespace()
        .map(|t| t.trim_matches('\''))
        .find_map(|t| t.strip_prefix("--databaseName=").map(str::to_string))
}

#[async_trait]
impl Remote for FakeSource {
    fn describe(&self) -> String {
        "root@source.test:22".to_string()
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.state.lock().unwrap().commands.push(command.to_string());

        if command.contains("db:export") {
            let db = database_of(command).unwrap_or_default();
            let start = Instant::now();
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.export_delay.is_zero() {
                tokio::time::sleep(self.export_delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            state.export_spans.push((db.clone(), start, Instant::now()));
            if state.crashing_exports.contains(&db) {
                drop(state);
                panic!("export of {db} crashed");
            }
            if state.failing_exports.contains(&db) {
                return Err(RemoteError::NonZeroExit {
                    command: command.to_string(),
                    status: 1,
                    stdout: String::new(),
                    stderr: format!("Database \"{db}\" export failed"),
                });
            }
            return Ok(CommandOutput::ok(""));
        }

        if let Some(path) = command.strip_prefix("sha256sum ") {
            let path = path.trim().trim_matches('\'');
            let digest = if self.state.lock().unwrap().corrupt.iter().any(|n| path.contains(n.as_str())) {
                "0".repeat(64)
            } else {
                hex::encode(Sha256::digest(&self.dump))
            };
            return Ok(CommandOutput::ok(format!("{digest}  {path}\n")));
        }

        Ok(CommandOutput::ok(""))
    }

    async fn transfer_file(&self, remote_path: &str, local_path: &Path, direction: Direction) -> Result<(), RemoteError> {
        {
            let mut state = self.state.lock().unwrap();
            state.transfers.push((remote_path.to_string(), local_path.to_path_buf()));
            if state.failing_transfers.iter().any(|n| remote_path.contains(n.as_str())) {
                return Err(RemoteError::Transfer {
                    path: remote_path.to_string(),
                    status: 23,
                    detail: "rsync: some files could not be transferred".to_string(),
                });
            }
        }
        if direction == Direction::Push {
            return Ok(());
        }
        let io = |e: std::io::Error| RemoteError::Transfer { path: remote_path.to_string(), status: 11, detail: e.to_string() };
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        if remote_path == SOURCE_INVENTORY_PATH {
            return match &self.snapshot {
                Some(snap) => std::fs::copy(snap, local_path).map(|_| ()).map_err(io),
                None => Err(RemoteError::Timeout { host: self.host(), detail: "Connection timed out".to_string() }),
            };
        }
        if remote_path.ends_with(".sql.gz") {
            return std::fs::write(local_path, &self.dump).map_err(io);
        }
        // vhost files and the like
        std::fs::write(local_path, format!("# {remote_path}\n")).map_err(io)
    }

    async fn sync_tree(&self, remote_dir: &str, local_dir: &Path, opts: &SyncOptions) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.syncs.push((remote_dir.to_string(), local_dir.to_path_buf(), opts.clone()));
        if state.failing_syncs.iter().any(|n| remote_dir.contains(n.as_str())) {
            return Err(RemoteError::Transfer {
                path: remote_dir.to_string(),
                status: 23,
                detail: "rsync: change_dir failed: No such file or directory (2)".to_string(),
            });
        }
        Ok(())
    }
}
