//! Health check of a single repository.
//!
//! A check reads the working tree status, updates the staleness cache, compares
//! every remote's push refs and brings the archive folder up to date. Whatever
//! needs a human's attention ends up as a finding in the returned [`RepoReport`].

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use tracing::{error, info, info_span, warn};

use crate::archive::{ArchiveDestination, ArchiveLayout, Archiver};
use crate::config::Policy;
use crate::parse::{parse_log, parse_names, parse_push_divergence, parse_status};
use crate::repo_status::RepoReport;
use crate::runner::{CommandOutput, CommandRunner};
use crate::settings::{RepositorySettings, METADATA_DIR};
use crate::staleness::{Clock, Observation, StalenessCache, STALE_AFTER_DAYS};

/// The repository root for `dir`; a metadata directory resolves to its parent.
pub fn resolve_repo_root(dir: &Path) -> PathBuf {
    if dir.file_name().map_or(false, |name| name == METADATA_DIR) {
        if let Some(parent) = dir.parent() {
            return parent.to_path_buf();
        }
    }
    dir.to_path_buf()
}

pub fn repo_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string())
}

pub struct HealthCheck<'a, R: CommandRunner, C: Clock> {
    runner: &'a R,
    clock: &'a C,
    cache: &'a mut StalenessCache,
    policy: Policy,
}

impl<'a, R: CommandRunner, C: Clock> HealthCheck<'a, R, C> {
    pub fn new(
        runner: &'a R,
        clock: &'a C,
        cache: &'a mut StalenessCache,
        policy: Policy,
    ) -> Self {
        Self {
            runner,
            clock,
            cache,
            policy,
        }
    }

    /// Checks the repository at `dir`.
    ///
    /// Problems worth reporting become findings. An `Err` means the check itself
    /// could not complete, e.g. missing settings or unparseable `git log` output.
    pub fn check(&mut self, dir: &Path) -> Result<RepoReport> {
        let root = resolve_repo_root(dir);
        let name = repo_name(&root);
        let _span = info_span!("check", repo = %name).entered();
        info!(dir = %root.display(), "checking repository");

        let settings = RepositorySettings::load(&root, self.policy.settings_location)?;
        let mut report = RepoReport::new(&root);

        self.check_working_tree(&root, &mut report)?;
        self.check_remotes(&root, &mut report)?;
        self.check_archive(&root, &name, &settings, &mut report)?;

        if report.is_healthy() {
            info!("repository is healthy");
        } else {
            warn!(findings = report.findings.len(), "repository needs attention");
        }
        Ok(report)
    }

    fn check_working_tree(&mut self, root: &Path, report: &mut RepoReport) -> Result<()> {
        let output = git(self.runner, root, &["status"])?;
        if !output.success() {
            bail!(
                "git status failed in {}: {}",
                root.display(),
                output.stderr.join("\n").trim()
            );
        }
        let status = parse_status(&output.stdout)?;
        let dirty = !status.is_clean();
        info!(branch = %status.branch, dirty, "{}", status.summary);

        let runner = self.runner;
        let key = root.to_string_lossy();
        let observation =
            self.cache
                .observe(&key, dirty, self.clock.now(), || last_commit_date(runner, root))?;

        if let Observation::StillDirty { since, stale: true } = observation {
            error!(%since, "uncommitted changes for more than {STALE_AFTER_DAYS} days");
            report.push(format!(
                "uncommitted changes for more than {STALE_AFTER_DAYS} days (since {})",
                since.to_rfc3339_opts(SecondsFormat::Secs, false)
            ));
        }
        Ok(())
    }

    fn check_remotes(&self, root: &Path, report: &mut RepoReport) -> Result<()> {
        let remotes = git(self.runner, root, &["remote"])?;
        for remote in parse_names(&remotes.stdout) {
            info!(%remote, "checking remote");
            let output = git(self.runner, root, &["remote", "show", remote.as_str()])?;
            if output.success() {
                let diverged = parse_push_divergence(&output.stdout);
                if !diverged.is_empty() {
                    warn!(%remote, branches = diverged.len(), "remote is out of sync");
                    report.push(format!("push or pull {remote}"));
                    report.extend(diverged);
                }
            } else {
                error!(%remote, "{}", output.stderr.join("\n").trim());
                report.push(format!("remote show {remote} failed"));
                report.extend(
                    output
                        .stderr
                        .into_iter()
                        .filter(|line| !line.trim().is_empty()),
                );
            }
        }
        Ok(())
    }

    fn check_archive(
        &self,
        root: &Path,
        name: &str,
        settings: &RepositorySettings,
        report: &mut RepoReport,
    ) -> Result<()> {
        let folder = match settings.destination() {
            ArchiveDestination::Disabled => {
                warn!("archive destination not configured");
                report.push("archive destination not configured");
                return Ok(());
            }
            ArchiveDestination::Folder(folder) => folder,
        };
        if !folder.is_dir() {
            error!(folder = %folder.display(), "archive destination does not exist");
            report.push(format!(
                "archive destination does not exist [{}]",
                folder.display()
            ));
            return Ok(());
        }

        let layout = ArchiveLayout::new(folder, name);
        let summary = Archiver::new(self.runner, root).run(&layout, &settings.branches)?;
        if !summary.created.is_empty() {
            info!(created = summary.created.len(), "archive folder updated");
        }
        report.extend(summary.findings);
        Ok(())
    }
}

fn last_commit_date<R: CommandRunner>(runner: &R, root: &Path) -> Result<DateTime<FixedOffset>> {
    let output = git(runner, root, &["log", "-1", "HEAD"])?;
    if !output.success() {
        bail!("git log failed: {}", output.stderr.join("\n").trim());
    }
    Ok(parse_log(&output.stdout)?.date)
}

fn git<R: CommandRunner>(runner: &R, root: &Path, args: &[&str]) -> Result<CommandOutput> {
    runner
        .run(root, args)
        .with_context(|| format!("running git {} in {}", args.join(" "), root.display()))
}
