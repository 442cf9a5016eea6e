//! Parsers for the human-readable output of `git`.
//!
//! Every phrase the tool depends on is declared here, so a change in the wording
//! of `git`'s output only ever has to be followed in this module.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset};

/// Last line of `git status` when nothing is modified.
pub const WORKING_TREE_CLEAN: &str = "working tree clean";

/// Header of the push section printed by `git remote show <remote>`.
pub const PUSH_REFS_HEADER: &str = "Local refs configured for 'git push':";

/// Suffix of a push line whose local and remote branches agree.
pub const UP_TO_DATE: &str = "(up to date)";

/// Default `git log` date format, e.g. `Mon Oct 5 14:03:12 2026 +0900`.
pub const LOG_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y %z";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub branch: String,
    pub summary: String,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        self.summary.contains(WORKING_TREE_CLEAN)
    }
}

/// A single commit as printed by `git log -1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogRecord {
    pub commit_id: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
    pub message: String,
}

pub fn parse_status(lines: &[String]) -> Result<StatusSummary> {
    let first = lines
        .first()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| anyhow!("empty status output"))?;
    let branch = first.split(' ').last().unwrap_or_default().to_string();

    let summary = lines
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .cloned()
        .unwrap_or_default();

    Ok(StatusSummary { branch, summary })
}

enum LogState {
    Header,
    Body(Vec<String>),
}

pub fn parse_log(lines: &[String]) -> Result<CommitLogRecord> {
    let mut commit_id = None;
    let mut author = String::new();
    let mut date = None;
    let mut state = LogState::Header;

    for line in lines {
        if let LogState::Body(message) = &mut state {
            if !line.trim().is_empty() {
                message.push(line.trim().to_string());
            }
            continue;
        }

        if line.starts_with("commit") {
            commit_id = line.split_whitespace().nth(1).map(str::to_string);
        } else if line.trim().is_empty() {
            state = LogState::Body(Vec::new());
        } else if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key {
                "Author" => author = value.to_string(),
                "Date" => {
                    let parsed = DateTime::parse_from_str(value, LOG_DATE_FORMAT)
                        .with_context(|| format!("unparseable commit date `{value}`"))?;
                    date = Some(parsed);
                }
                _ => {}
            }
        }
    }

    let commit_id = commit_id.ok_or_else(|| anyhow!("log output has no commit line"))?;
    let Some(date) = date else {
        bail!("log output for {commit_id} has no Date field");
    };
    let message = match state {
        LogState::Body(message) => message.join("\n"),
        LogState::Header => String::new(),
    };

    Ok(CommitLogRecord {
        commit_id,
        author,
        date,
        message,
    })
}

/// Push lines of `git remote show` that are not up to date.
pub fn parse_push_divergence(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .skip_while(|line| !line.contains(PUSH_REFS_HEADER))
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.ends_with(UP_TO_DATE))
        .cloned()
        .collect()
}

/// One name per line, as printed by `git tag` and `git remote`.
pub fn parse_names(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_head_commit(lines: &[String]) -> Result<String> {
    lines
        .first()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("log output has no commit id"))
}
