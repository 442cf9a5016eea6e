//! Decides which tag and branch snapshots are missing from the archive folder and
//! produces them with `git archive`.
//!
//! Tags are archived once: an existing artifact is final. Branch heads are tracked
//! with a `.ref` marker next to the artifact holding the commit id last archived.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::atomic;
use crate::parse::{parse_head_commit, parse_names};
use crate::runner::{display_args, CommandOutput, CommandRunner};

/// Settings value that turns archiving off for a repository.
pub const DISABLED_SENTINEL: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveDestination {
    Disabled,
    Folder(PathBuf),
}

impl ArchiveDestination {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == DISABLED_SENTINEL {
            ArchiveDestination::Disabled
        } else {
            ArchiveDestination::Folder(PathBuf::from(value))
        }
    }
}

/// Where the artifacts of one repository live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    folder: PathBuf,
    repo_name: String,
}

impl ArchiveLayout {
    pub fn new(folder: impl Into<PathBuf>, repo_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            repo_name: repo_name.into(),
        }
    }

    pub fn tag_artifact(&self, tag: &str) -> PathBuf {
        self.folder.join(format!("{}-{}.zip", self.repo_name, file_safe(tag)))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn branch_artifact(&self, branch: &str) -> PathBuf {
        self.branch_file(branch, "zip")
    }

    pub fn branch_marker(&self, branch: &str) -> PathBuf {
        self.branch_file(branch, "ref")
    }

    fn branch_file(&self, branch: &str, extension: &str) -> PathBuf {
        self.folder.join(format!(
            "{}-{}-latest.{extension}",
            self.repo_name,
            file_safe(branch)
        ))
    }
}

// Ref names may contain `/`, which must not turn into subdirectories. `%` is
// escaped too so distinct names never map to the same file.
fn file_safe(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Commit id recorded by the last branch archive, or `""` when none was made.
pub fn read_marker(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.lines().next().unwrap_or_default().trim().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("reading marker {}", path.display())),
    }
}

pub fn write_marker(path: &Path, commit: &str) -> Result<()> {
    atomic::write(path, commit).with_context(|| format!("writing marker {}", path.display()))
}

pub fn branch_needs_archive(marker_commit: &str, head_commit: &str) -> bool {
    marker_commit != head_commit
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub created: Vec<PathBuf>,
    pub findings: Vec<String>,
}

impl ArchiveSummary {
    fn command_failed(&mut self, what: String, output: &CommandOutput) {
        self.findings.push(what);
        self.findings.extend(
            output
                .stderr
                .iter()
                .filter(|line| !line.trim().is_empty())
                .cloned(),
        );
    }
}

pub struct Archiver<'a, R: CommandRunner> {
    runner: &'a R,
    workdir: &'a Path,
}

impl<'a, R: CommandRunner> Archiver<'a, R> {
    pub fn new(runner: &'a R, workdir: &'a Path) -> Self {
        Self { runner, workdir }
    }

    pub fn run(
        &self,
        layout: &ArchiveLayout,
        branches: &BTreeSet<String>,
    ) -> Result<ArchiveSummary> {
        let mut summary = ArchiveSummary::default();
        self.archive_tags(layout, &mut summary)?;
        self.archive_branches(layout, branches, &mut summary)?;
        Ok(summary)
    }

    pub fn archive_tags(
        &self,
        layout: &ArchiveLayout,
        summary: &mut ArchiveSummary,
    ) -> Result<()> {
        let output = self.git(&["tag"])?;
        if !output.success() {
            summary.command_failed("listing tags failed".to_string(), &output);
            return Ok(());
        }

        for tag in parse_names(&output.stdout) {
            let artifact = layout.tag_artifact(&tag);
            if artifact.exists() {
                debug!(%tag, "tag already archived");
                continue;
            }
            if self.archive(layout, &artifact, &tag, summary)? {
                info!(%tag, artifact = %artifact.display(), "archived tag");
            }
        }
        Ok(())
    }

    pub fn archive_branches(
        &self,
        layout: &ArchiveLayout,
        branches: &BTreeSet<String>,
        summary: &mut ArchiveSummary,
    ) -> Result<()> {
        for branch in branches {
            let marker = layout.branch_marker(branch);
            let archived = read_marker(&marker)?;

            let output = self.git(&["log", "-1", branch.as_str()])?;
            let head = if output.success() {
                parse_head_commit(&output.stdout).ok()
            } else {
                None
            };
            let Some(head) = head else {
                warn!(%branch, "cannot resolve branch head");
                summary.command_failed(format!("cannot resolve branch {branch}"), &output);
                continue;
            };

            if !branch_needs_archive(&archived, &head) {
                debug!(%branch, %head, "branch archive is current");
                continue;
            }

            let artifact = layout.branch_artifact(branch);
            if self.archive(layout, &artifact, branch, summary)? {
                write_marker(&marker, &head)?;
                info!(%branch, %head, artifact = %artifact.display(), "archived branch");
            }
        }
        Ok(())
    }

    /// Runs `git archive` into a temporary file in the archive folder and moves it
    /// onto `artifact` only when git succeeds. git creates its output file before it
    /// resolves the ref, and a failed run must not leave anything at `artifact`.
    fn archive(
        &self,
        layout: &ArchiveLayout,
        artifact: &Path,
        reference: &str,
        summary: &mut ArchiveSummary,
    ) -> Result<bool> {
        // git picks the archive format from the output file's extension.
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(".zip")
            .tempfile_in(layout.folder())
            .with_context(|| format!("creating temp file in {}", layout.folder().display()))?;

        let args = [
            OsStr::new("archive"),
            OsStr::new("-o"),
            partial.path().as_os_str(),
            OsStr::new(reference),
        ];
        let output = self.git(&args)?;
        if !output.success() {
            warn!(%reference, exit_code = output.exit_code, "git archive failed");
            summary.command_failed(format!("archive {reference} failed"), &output);
            return Ok(false);
        }

        partial
            .persist(artifact)
            .map_err(|e| e.error)
            .with_context(|| format!("moving archive into {}", artifact.display()))?;
        summary.created.push(artifact.to_path_buf());
        Ok(true)
    }

    fn git<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<CommandOutput> {
        self.runner
            .run(self.workdir, args)
            .with_context(|| format!("running git {}", display_args(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_sentinel() {
        assert_eq!(ArchiveDestination::parse("-"), ArchiveDestination::Disabled);
        assert_eq!(ArchiveDestination::parse(""), ArchiveDestination::Disabled);
        assert_eq!(
            ArchiveDestination::parse("/backup"),
            ArchiveDestination::Folder(PathBuf::from("/backup"))
        );
    }

    #[test]
    fn layout_paths() {
        let layout = ArchiveLayout::new("/backup", "tool");
        assert_eq!(layout.tag_artifact("v1.0"), PathBuf::from("/backup/tool-v1.0.zip"));
        assert_eq!(
            layout.branch_artifact("master"),
            PathBuf::from("/backup/tool-master-latest.zip")
        );
        assert_eq!(
            layout.branch_marker("feature/login"),
            PathBuf::from("/backup/tool-feature%2Flogin-latest.ref")
        );
        assert_eq!(
            layout.branch_artifact("release-1.2"),
            PathBuf::from("/backup/tool-release-1.2-latest.zip")
        );
    }

    #[test]
    fn escaped_names_do_not_collide() {
        let layout = ArchiveLayout::new("/backup", "tool");
        let names = ["a/b", "a_b", "a%2Fb", "a\\b", "a%b"];
        let paths: BTreeSet<PathBuf> = names.iter().map(|n| layout.tag_artifact(n)).collect();
        assert_eq!(paths.len(), names.len());
        assert_eq!(layout.tag_artifact("a_b"), PathBuf::from("/backup/tool-a_b.zip"));
        assert_eq!(layout.tag_artifact("a%2Fb"), PathBuf::from("/backup/tool-a%252Fb.zip"));
        for path in &paths {
            assert_eq!(path.parent(), Some(Path::new("/backup")));
        }
    }

    #[test]
    fn marker_absent_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.ref");
        assert_eq!(read_marker(&path).unwrap(), "");
        write_marker(&path, "abc123").unwrap();
        assert_eq!(read_marker(&path).unwrap(), "abc123");
    }

    #[test]
    fn branch_decision() {
        assert!(branch_needs_archive("", "abc"));
        assert!(branch_needs_archive("abc", "def"));
        assert!(!branch_needs_archive("abc", "abc"));
    }
}
