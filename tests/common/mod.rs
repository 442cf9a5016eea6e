// Shared fixtures for integration tests: a scripted `git` and a settable clock.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use git_archive::runner::{CommandOutput, CommandRunner};
use git_archive::settings::{RepositorySettings, SETTINGS_FILE};
use git_archive::staleness::Clock;
use tempfile::TempDir;

pub const CLEAN_STATUS: &str =
    "On branch master\nYour branch is up to date with 'origin/master'.\n\nnothing to commit, working tree clean\n";

pub const DIRTY_STATUS: &str = "On branch master\nChanges not staged for commit:\n  (use \"git add <file>...\" to update what will be committed)\n\tmodified:   src/lib.rs\n\nno changes added to commit (use \"git add\" and/or \"git commit -a\")\n";

pub fn out(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stdout: stdout.split('\n').map(str::to_string).collect(),
        stderr: stderr.split('\n').map(str::to_string).collect(),
    }
}

pub fn log_text(commit: &str, date: DateTime<FixedOffset>) -> String {
    format!(
        "commit {commit}\nAuthor: Test User <test@example.com>\nDate:   {}\n\n    Some work\n",
        date.format("%a %b %-d %H:%M:%S %Y %z")
    )
}

/// A fake `git` answering from per-command scripts. `archive -o <file>` creates
/// the file before looking at the ref, like the real command, so a failing
/// archive leaves an empty file behind.
#[derive(Default)]
pub struct FakeGit {
    pub status: RefCell<String>,
    pub head_log: RefCell<Option<String>>,
    pub tags: RefCell<Vec<String>>,
    pub branch_heads: RefCell<BTreeMap<String, String>>,
    pub remotes: RefCell<BTreeMap<String, CommandOutput>>,
    pub failing_archives: RefCell<Vec<String>>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl FakeGit {
    pub fn new() -> Self {
        let git = Self::default();
        git.set_status(CLEAN_STATUS);
        git
    }

    pub fn set_status(&self, status: &str) {
        *self.status.borrow_mut() = status.to_string();
    }

    pub fn set_head_log(&self, commit: &str, date: DateTime<FixedOffset>) {
        *self.head_log.borrow_mut() = Some(log_text(commit, date));
    }

    pub fn add_tag(&self, tag: &str) {
        self.tags.borrow_mut().push(tag.to_string());
    }

    pub fn set_branch_head(&self, branch: &str, commit: &str) {
        self.branch_heads
            .borrow_mut()
            .insert(branch.to_string(), commit.to_string());
    }

    pub fn add_remote(&self, name: &str, show: CommandOutput) {
        self.remotes.borrow_mut().insert(name.to_string(), show);
    }

    pub fn archive_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some("archive"))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl CommandRunner for FakeGit {
    fn run<S: AsRef<OsStr>>(&self, _workdir: &Path, args: &[S]) -> io::Result<CommandOutput> {
        let owned: Vec<String> = args
            .iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect();
        self.calls.borrow_mut().push(owned.clone());
        let words: Vec<&str> = owned.iter().map(String::as_str).collect();

        let output = match words.as_slice() {
            ["status"] => out(0, &self.status.borrow(), ""),
            ["log", "-1", "HEAD"] => match &*self.head_log.borrow() {
                Some(text) => out(0, text, ""),
                None => out(
                    128,
                    "",
                    "fatal: your current branch 'master' does not have any commits yet\n",
                ),
            },
            ["log", "-1", branch] => match self.branch_heads.borrow().get(*branch) {
                Some(commit) => out(0, &log_text(commit, fixed(2026, 1, 1)), ""),
                None => out(
                    128,
                    "",
                    &format!("fatal: ambiguous argument '{branch}': unknown revision\n"),
                ),
            },
            ["tag"] => out(0, &(self.tags.borrow().join("\n") + "\n"), ""),
            ["remote"] => {
                let names: Vec<String> = self.remotes.borrow().keys().cloned().collect();
                out(0, &(names.join("\n") + "\n"), "")
            }
            ["remote", "show", name] => self
                .remotes
                .borrow()
                .get(*name)
                .cloned()
                .unwrap_or_else(|| out(128, "", "fatal: no such remote\n")),
            ["archive", "-o", _, reference] => {
                let file = Path::new(args[2].as_ref());
                fs::write(file, "")?;
                if self.failing_archives.borrow().iter().any(|r| r == reference) {
                    out(128, "", "fatal: not a valid object name\n")
                } else {
                    fs::write(file, format!("zip of {reference}"))?;
                    out(0, "", "")
                }
            }
            _ => out(1, "", &format!("unexpected git {}\n", owned.join(" "))),
        };
        Ok(output)
    }
}

pub struct TestClock(Cell<DateTime<FixedOffset>>);

impl TestClock {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self(Cell::new(now))
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0.get()
    }
}

pub fn fixed(year: i32, month: u32, day: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(year, month, day, 10, 0, 0)
        .unwrap()
}

/// A sandbox with one repository directory and one archive folder.
pub struct Sandbox {
    pub dir: TempDir,
    pub repo: PathBuf,
    pub archive: PathBuf,
    pub cache_file: PathBuf,
}

impl Sandbox {
    pub fn new(branches: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("tool");
        let archive = dir.path().join("backup");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::create_dir_all(&archive).unwrap();

        let settings = RepositorySettings::new(
            archive.to_string_lossy(),
            branches.iter().map(|b| b.to_string()).collect(),
        );
        settings.save_to_path(&repo.join(SETTINGS_FILE)).unwrap();

        let cache_file = dir.path().join("home").join("dirty-since.tsv");
        Self {
            dir,
            repo,
            archive,
            cache_file,
        }
    }

    pub fn set_archive_folder(&self, folder: &str) {
        let path = self.repo.join(SETTINGS_FILE);
        let mut settings = RepositorySettings::load_file(&path).unwrap();
        settings.set_archive_folder(folder);
        settings.save_to_path(&path).unwrap();
    }

    pub fn archive_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.archive)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
