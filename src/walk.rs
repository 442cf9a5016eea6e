//! Walks the configured folders, checks every repository that carries a settings
//! file and writes the combined report.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{Config, NotificationNaming, Policy};
use crate::health::{resolve_repo_root, HealthCheck};
use crate::repo_status::RepoReport;
use crate::runner::CommandRunner;
use crate::settings::{METADATA_DIR, SETTINGS_FILE};
use crate::staleness::{Clock, StalenessCache};

/// Repository roots below `folders` that have a settings file, sorted and de-duplicated.
pub fn find_repositories(folders: &[String], max_depth: usize) -> Vec<PathBuf> {
    let mut roots = BTreeSet::new();
    for folder in folders {
        let walker = WalkDir::new(folder)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| !is_inside_metadata_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry under {folder}: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() && entry.file_name() == SETTINGS_FILE {
                if let Some(dir) = entry.path().parent() {
                    let root = resolve_repo_root(dir);
                    debug!(repo = %root.display(), "found repository");
                    roots.insert(root);
                }
            }
        }
    }
    roots.into_iter().collect()
}

// The metadata directory itself is visited (it may hold the settings file),
// but nothing below it.
fn is_inside_metadata_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .map_or(false, |name| name == METADATA_DIR)
}

/// Checks each repository in turn. A repository whose check fails outright is
/// reported with the error and the walk moves on.
pub fn check_all<R: CommandRunner, C: Clock>(
    repos: &[PathBuf],
    runner: &R,
    clock: &C,
    cache: &mut StalenessCache,
    policy: Policy,
) -> Vec<RepoReport> {
    let mut check = HealthCheck::new(runner, clock, cache, policy);
    repos
        .iter()
        .map(|repo| match check.check(repo) {
            Ok(report) => report,
            Err(e) => {
                error!(repo = %repo.display(), "check failed: {e:#}");
                let mut report = RepoReport::new(resolve_repo_root(repo));
                report.push(format!("check failed: {e:#}"));
                report
            }
        })
        .collect()
}

/// All report lines, repository by repository.
pub fn render(reports: &[RepoReport]) -> Vec<String> {
    reports.iter().flat_map(RepoReport::lines).collect()
}

pub fn notify_target(
    base: &Path,
    naming: NotificationNaming,
    now: DateTime<FixedOffset>,
) -> PathBuf {
    match naming {
        NotificationNaming::Fixed => base.to_path_buf(),
        NotificationNaming::Timestamped => {
            let stem = base
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "report".to_string());
            let stamp = now.format("%Y%m%d-%H%M%S");
            let name = match base.extension() {
                Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
                None => format!("{stem}-{stamp}"),
            };
            base.with_file_name(name)
        }
    }
}

/// Writes the report lines. Returns the file written, if any.
///
/// A timestamped report is only created when there is something to say; a fixed
/// one is truncated when everything is healthy so it never shows old problems.
pub fn write_notification(
    lines: &[String],
    base: &Path,
    naming: NotificationNaming,
    now: DateTime<FixedOffset>,
) -> Result<Option<PathBuf>> {
    if lines.is_empty() && naming == NotificationNaming::Timestamped {
        return Ok(None);
    }
    let target = notify_target(base, naming, now);
    Config::create_dir(&target)?;

    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    fs::write(&target, text).with_context(|| format!("writing {}", target.display()))?;
    Ok(Some(target))
}

#[derive(Debug)]
pub struct WalkOutcome {
    pub reports: Vec<RepoReport>,
    pub notification: Option<PathBuf>,
}

impl WalkOutcome {
    pub fn has_findings(&self) -> bool {
        self.reports.iter().any(|report| !report.is_healthy())
    }
}

/// The `walk` command: find, check, and notify unless `silent`.
pub fn walk<R: CommandRunner, C: Clock>(
    config: &Config,
    runner: &R,
    clock: &C,
    cache: &mut StalenessCache,
    silent: bool,
) -> Result<WalkOutcome> {
    if config.folders.is_empty() {
        warn!("no folders configured, nothing to walk");
        return Ok(WalkOutcome {
            reports: vec![],
            notification: None,
        });
    }

    let repos = find_repositories(&config.folders, config.max_depth);
    info!(count = repos.len(), "found repositories");

    let reports = check_all(&repos, runner, clock, cache, config.policy);
    let lines = render(&reports);

    let notification = if silent {
        None
    } else {
        let written = write_notification(
            &lines,
            &config.notify_path()?,
            config.policy.notification_naming,
            clock.now(),
        )?;
        if let Some(path) = &written {
            info!(file = %path.display(), lines = lines.len(), "wrote report");
        }
        written
    };

    Ok(WalkOutcome {
        reports,
        notification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn noon() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 19, 12, 30, 5)
            .unwrap()
    }

    #[test]
    fn timestamped_name() {
        let target = notify_target(
            Path::new("/tmp/report.txt"),
            NotificationNaming::Timestamped,
            noon(),
        );
        assert_eq!(target, PathBuf::from("/tmp/report-20261019-123005.txt"));
        assert_eq!(
            notify_target(Path::new("/tmp/report.txt"), NotificationNaming::Fixed, noon()),
            PathBuf::from("/tmp/report.txt")
        );
    }

    #[test]
    fn finds_settings_in_root_and_metadata_dir() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("nested").join("b");
        fs::create_dir_all(a.join(METADATA_DIR).join("objects")).unwrap();
        fs::create_dir_all(b.join(METADATA_DIR)).unwrap();
        fs::write(a.join(SETTINGS_FILE), "{}").unwrap();
        fs::write(a.join(METADATA_DIR).join(SETTINGS_FILE), "{}").unwrap();
        fs::write(b.join(METADATA_DIR).join(SETTINGS_FILE), "{}").unwrap();
        // Below the metadata dir is never searched.
        fs::write(a.join(METADATA_DIR).join("objects").join(SETTINGS_FILE), "{}").unwrap();

        let folders = vec![dir.path().to_string_lossy().into_owned()];
        assert_eq!(find_repositories(&folders, 255), vec![a, b]);
    }

    #[test]
    fn healthy_walk_writes_nothing_timestamped() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("report.txt");
        let written =
            write_notification(&[], &base, NotificationNaming::Timestamped, noon()).unwrap();
        assert!(written.is_none());

        fs::write(&base, "old\n").unwrap();
        let written = write_notification(&[], &base, NotificationNaming::Fixed, noon()).unwrap();
        assert_eq!(written, Some(base.clone()));
        assert_eq!(fs::read_to_string(&base).unwrap(), "");
    }

    #[test]
    fn report_lines_are_concatenated() {
        let mut a = RepoReport::new("/src/a");
        a.push("push or pull origin");
        let b = RepoReport::new("/src/b");
        let mut c = RepoReport::new("/src/c");
        c.push("archive destination not configured");

        let lines = render(&[a, b, c]);
        assert_eq!(
            lines,
            vec![
                "/src/a",
                "    push or pull origin",
                "/src/c",
                "    archive destination not configured",
            ]
        );
    }
}
