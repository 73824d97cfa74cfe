use migrate_core::{CommandOutput, ExecError, LocalExec};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::flag_value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub input: Option<String>,
}

struct Failure {
    program: String,
    needle: String,
    reply: CommandOutput,
}

#[derive(Default)]
struct HostState {
    users: HashSet<String>,
    databases: HashSet<String>,
    imports: Vec<String>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
}

/// Scripted local machine. Tracks system users and panel databases so
/// repeated runs observe what earlier runs created.
pub struct FakeHost {
    tool: String,
    /// Destination inventory that `site:add:php` writes into, as the panel would.
    inventory: Option<PathBuf>,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(tool: &str) -> Self {
        FakeHost { tool: tool.to_string(), inventory: None, state: Mutex::new(HostState::default()) }
    }

    pub fn with_inventory(mut self, path: impl Into<PathBuf>) -> Self {
        self.inventory = Some(path.into());
        self
    }

    /// Make calls of `program` whose arguments contain `needle` return `reply`.
    pub fn fail_on(&self, program: &str, needle: &str, reply: CommandOutput) {
        self.state.lock().unwrap().failures.push(Failure {
            program: program.to_string(),
            needle: needle.to_string(),
            reply,
        });
    }

    pub fn add_user(&self, name: &str) {
        self.state.lock().unwrap().users.insert(name.to_string());
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.state.lock().unwrap().users.contains(name)
    }

    pub fn add_database(&self, name: &str) {
        self.state.lock().unwrap().databases.insert(name.to_string());
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.state.lock().unwrap().databases.contains(name)
    }

    pub fn imports(&self) -> Vec<String> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls of `program` whose first argument is `sub` (any first argument when `sub` is empty).
    pub fn count(&self, program: &str, sub: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.program == program && (sub.is_empty() || c.args.first().map(String::as_str) == Some(sub)))
            .count()
    }

    fn panel(&self, args: &[String], state: &mut HostState) -> CommandOutput {
        match args.first().map(String::as_str) {
            Some("site:add:php") => {
                let domain = flag_value(args, "domainName").unwrap_or_default();
                let user = flag_value(args, "siteUser").unwrap_or_default();
                if let Some(path) = &self.inventory {
                    let inserted = Connection::open(path).and_then(|c| {
                        c.execute(
                            "INSERT INTO site(created_at,updated_at,type,domain_name,user,vhost_template) VALUES ('now','now','php',?,?,'Generic')",
                            params![domain, user],
                        )
                    });
                    if let Err(e) = inserted {
                        return CommandOutput::failed(1, format!("Site creation failed: {e}"));
                    }
                }
                state.users.insert(user);
                CommandOutput::ok(format!("Site {domain} has been created."))
            }
            Some("db:add") => {
                let name = flag_value(args, "databaseName").unwrap_or_default();
                if !state.databases.insert(name.clone()) {
                    return CommandOutput::failed(1, format!("Database \"{name}\" already exists."));
                }
                CommandOutput::ok("Database has been created.")
            }
            Some("db:import") => {
                state.imports.push(flag_value(args, "databaseName").unwrap_or_default());
                CommandOutput::ok("Database has been imported.")
            }
            Some("lets-encrypt:install:certificate") => CommandOutput::ok("Certificate installation was successful."),
            _ => CommandOutput::failed(1, "unknown command"),
        }
    }
}

impl LocalExec for FakeHost {
    fn run_input(&self, program: &str, args: &[String], input: Option<&str>) -> Result<CommandOutput, ExecError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call { program: program.to_string(), args: args.to_vec(), input: input.map(str::to_string) });

        if let Some(f) = state
            .failures
            .iter()
            .find(|f| f.program == program && args.iter().any(|a| a.contains(&f.needle)))
        {
            return Ok(f.reply.clone());
        }

        let out = match program {
            "id" => {
                let name = args.last().cloned().unwrap_or_default();
                if state.users.contains(&name) {
                    CommandOutput::ok("1001\n")
                } else {
                    CommandOutput::failed(1, format!("id: '{name}': no such user"))
                }
            }
            "useradd" => {
                let name = args.last().cloned().unwrap_or_default();
                if !state.users.insert(name.clone()) {
                    CommandOutput::failed(9, format!("useradd: user '{name}' already exists"))
                } else {
                    CommandOutput::ok("")
                }
            }
            p if p == self.tool => self.panel(args, &mut state),
            _ => CommandOutput::ok(""),
        };
        Ok(out)
    }
}
