use anyhow::{Context, Result};
use inventory_sqlite::{CronEntry, DestinationInventory};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::SiteContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronReport {
    pub written: bool,
    pub inserted: usize,
    pub failed: usize,
    pub fragment: PathBuf,
}

/// Render the `/etc/cron.d` fragment for one site. cron.d lines carry the
/// user to run as between the schedule and the command.
pub fn render_fragment(domain: &str, user: &str, entries: &[CronEntry]) -> String {
    let mut out = format!("# cron jobs for {domain}, rewritten on every migration run\n");
    out.push_str("SHELL=/bin/bash\n");
    out.push_str("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n");
    for e in entries {
        // a raw newline would end the entry early
        let command = e.command.replace(['\r', '\n'], " ");
        out.push_str(&format!("{} {} {}\n", e.schedule(), user, command.trim()));
    }
    out
}

fn write_fragment(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    f.write_all(contents.as_bytes())?;
    f.sync_data()?;
    // cron ignores group/world writable files
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

/// Rewrite the site's cron fragment from scratch, then add the inventory
/// rows that are not there yet.
pub fn replicate_cron(dest: &DestinationInventory, cron_dir: &Path, ctx: &SiteContext, entries: &[CronEntry]) -> CronReport {
    let fragment = cron_dir.join(&ctx.user);
    let mut report = CronReport { fragment: fragment.clone(), ..CronReport::default() };

    match write_fragment(&fragment, &render_fragment(&ctx.domain, &ctx.user, entries)) {
        Ok(()) => {
            report.written = true;
            info!(domain = %ctx.domain, path = %fragment.display(), entries = entries.len(), "cron fragment written");
        }
        Err(e) => {
            warn!(domain = %ctx.domain, error = %format!("{e:#}"), "cron fragment not written");
            report.failed += 1;
        }
    }

    for entry in entries {
        match dest.insert_cron_entry(ctx.dest_id, entry) {
            Ok(true) => report.inserted += 1,
            Ok(false) => debug!(domain = %ctx.domain, schedule = %entry.schedule(), "cron row already present"),
            Err(e) => {
                warn!(domain = %ctx.domain, schedule = %entry.schedule(), error = %e, "cron row insert failed");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_sqlite::InventoryRead;
    use migrate_test_support::InventoryFixture;

    fn entry(minute: &str, command: &str) -> CronEntry {
        CronEntry {
            minute: minute.into(),
            hour: "*".into(),
            day: "*".into(),
            month: "*".into(),
            weekday: "*".into(),
            command: command.into(),
        }
    }

    #[test]
    fn fragment_has_user_column() {
        let text = render_fragment("a.example.com", "a", &[entry("*/5", "php /home/a/htdocs/a.example.com/cron.php")]);
        let line = text.lines().last().unwrap();
        assert_eq!(line, "*/5 * * * * a php /home/a/htdocs/a.example.com/cron.php");
        assert!(text.starts_with("# cron jobs for a.example.com"));
    }

    #[test]
    fn multiline_command_stays_on_one_line() {
        let text = render_fragment("a.example.com", "a", &[entry("0", "echo a\necho b")]);
        assert_eq!(text.lines().filter(|l| !l.starts_with('#') && !l.contains('=')).count(), 1);
    }

    #[test]
    fn rewrite_and_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dst.sq3");
        let fx = InventoryFixture::create(&path).unwrap();
        let dest_id = fx.site("a.example.com", "a", "pw", None).unwrap();
        let dest = DestinationInventory::open(&path).unwrap();
        let ctx = SiteContext {
            domain: "a.example.com".into(),
            source_id: 4,
            dest_id,
            user: "a".into(),
            source_user: "a".into(),
        };
        let cron_dir = dir.path().join("cron.d");
        let entries = vec![entry("*/5", "php cron.php"), entry("0", "php backup.php")];

        let first = replicate_cron(&dest, &cron_dir, &ctx, &entries);
        assert!(first.written);
        assert_eq!(first.inserted, 2);

        let second = replicate_cron(&dest, &cron_dir, &ctx, &entries[..1]);
        assert_eq!(second.inserted, 0);
        assert_eq!(dest.cron_entries(dest_id).unwrap().len(), 2);

        // the file follows the latest run, not the union
        let text = fs::read_to_string(&second.fragment).unwrap();
        assert!(text.contains("php cron.php"));
        assert!(!text.contains("backup.php"));
        let mode = fs::metadata(&second.fragment).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
