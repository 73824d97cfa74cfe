//! Migration run controller: configuration, logging, planning and the
//! orchestrated batch run behind the `site-migrate` binary.

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod summary;

pub use config::{load_config, Config};
pub use orchestrator::{read_status, Orchestrator};
pub use plan::{build_plans, render_plan_text, SitePlan};
pub use summary::{RunSummary, SiteOutcome, SiteReport};
