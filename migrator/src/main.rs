use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use migrate_core::SystemExec;
use remote::SshRemote;
use site_migrate::{config, logging, read_status, render_plan_text, Config, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Debug, Parser)]
#[command(name = "site-migrate", version, about = "Migrate PHP sites from another panel host onto this one")]
struct Cli {
    /// Config file (YAML). If omitted, loads ./site-migrate.yaml if present.
    #[arg(long, global = true, env = "SITE_MIGRATE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Migrate every php site (or the ones named with --site)
    Run {
        /// Only migrate this domain; repeatable
        #[arg(long = "site", value_name = "DOMAIN")]
        sites: Vec<String>,
        /// Concurrent export-and-copy jobs (overrides MAX_JOBS and the config file)
        #[arg(long)]
        max_jobs: Option<usize>,
        /// Summary format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Pull the source inventory and print what would be migrated
    Plan {
        #[arg(long = "site", value_name = "DOMAIN")]
        sites: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the database status markers left by earlier runs
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn settings(path: Option<&std::path::Path>, max_jobs: Option<usize>) -> Result<Config> {
    let mut cfg = config::load_config(path)?;
    cfg.apply_env(|k| std::env::var(k).ok())?;
    if let Some(n) = max_jobs {
        cfg.max_jobs = n;
    }
    Ok(cfg)
}

fn orchestrator(cfg: Config) -> Orchestrator {
    let remote = Arc::new(SshRemote::new(cfg.remote_host()));
    Orchestrator::new(cfg, remote, Arc::new(SystemExec))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("site-migrate {} (core {})", env!("CARGO_PKG_VERSION"), migrate_core::version());
        }
        Commands::Run { sites, max_jobs, format } => {
            let cfg = settings(cli.config.as_deref(), max_jobs)?;
            cfg.validate()?;
            logging::init(&cfg.paths.log_file())?;
            let orch = orchestrator(cfg);
            let rt = tokio::runtime::Runtime::new()?;
            let summary = match rt.block_on(orch.run(&sites)) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "migration aborted");
                    return Err(e);
                }
            };
            match format {
                OutputFormat::Text => print!("{}", summary.render_text()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
        }
        Commands::Plan { sites, format } => {
            let cfg = settings(cli.config.as_deref(), None)?;
            cfg.validate()?;
            logging::init_console();
            let orch = orchestrator(cfg);
            let rt = tokio::runtime::Runtime::new()?;
            let plans = rt.block_on(orch.plan(&sites))?;
            match format {
                OutputFormat::Text => print!("{}", render_plan_text(&plans)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plans)?),
            }
        }
        Commands::Status { format } => {
            let cfg = settings(cli.config.as_deref(), None)?;
            let markers = read_status(&cfg)?;
            match format {
                OutputFormat::Text => {
                    if markers.is_empty() {
                        println!("no status markers in {}", cfg.paths.status_dir().display());
                    }
                    for (db, status) in markers {
                        println!("{db:<32} {status}");
                    }
                }
                OutputFormat::Json => {
                    let obj: serde_json::Map<String, serde_json::Value> = markers
                        .into_iter()
                        .map(|(db, s)| (db, serde_json::Value::String(s.to_string())))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&obj)?);
                }
            }
        }
    }
    Ok(())
}
