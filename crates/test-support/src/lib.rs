//! Fakes and fixtures shared by the site-migrate test suites.
//!
//! [`FakeHost`] stands in for the local machine (system accounts, the
//! provisioning CLI, gzip, systemctl) and [`FakeSource`] for the ssh/rsync
//! channel to the source host.

mod exec;
mod fixture;
mod remote;

pub use exec::{Call, FakeHost};
pub use fixture::InventoryFixture;
pub use remote::{FakeSource, SOURCE_INVENTORY_PATH};

/// Value of an `--name=value` argument, with shell quotes stripped.
pub fn flag_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    args.iter()
        .map(|a| a.trim_matches('\''))
        .find_map(|a| a.strip_prefix(&prefix).map(str::to_string))
}
