//! Persistent record of when each repository was first seen with uncommitted work.
//!
//! The cache file holds one `path<TAB>timestamp` line per dirty repository. It is
//! replaced in full after every change, through a temporary file, so a crash loses
//! at most the update in flight.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, Local, SecondsFormat, SubsecRound};
use tracing::{debug, info, warn};

use crate::atomic;

/// Uncommitted work older than this many days is reported.
pub const STALE_AFTER_DAYS: i64 = 30;

pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// What a single observation did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Clean before and after.
    Clean,
    /// Dirty for the first time; the timestamp is now.
    FirstSeenDirty(DateTime<FixedOffset>),
    /// Still dirty. `stale` is set once the timestamp is older than the threshold.
    StillDirty {
        since: DateTime<FixedOffset>,
        stale: bool,
    },
    /// Was dirty, now clean; the entry has been dropped.
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessCache {
    path: PathBuf,
    entries: BTreeMap<String, DateTime<FixedOffset>>,
}

impl StalenessCache {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads the cache file. A missing file is an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        let mut entries = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((key, since)) => {
                    entries.insert(key, since);
                }
                None => warn!(
                    file = %path.display(),
                    line = number + 1,
                    "skipping malformed staleness cache line"
                ),
            }
        }

        Ok(Self { path, entries })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }

        let mut text = String::new();
        for (key, since) in &self.entries {
            text.push_str(key);
            text.push('\t');
            text.push_str(&since.to_rfc3339_opts(SecondsFormat::Micros, false));
            text.push('\n');
        }

        atomic::write(&self.path, text)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<DateTime<FixedOffset>> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one health-check observation for the repository at `key`.
    ///
    /// `last_commit_date` is only called when the tree was already dirty, and may
    /// move the timestamp forward but never back. Every change is saved before
    /// this returns.
    pub fn observe<F>(
        &mut self,
        key: &str,
        dirty: bool,
        now: DateTime<FixedOffset>,
        last_commit_date: F,
    ) -> Result<Observation>
    where
        F: FnOnce() -> Result<DateTime<FixedOffset>>,
    {
        let observation = match (dirty, self.entries.get(key).copied()) {
            (false, None) => Observation::Clean,
            (false, Some(_)) => {
                self.entries.remove(key);
                self.save()?;
                info!(repo = key, "working tree is clean again");
                Observation::Cleaned
            }
            (true, None) => {
                let since = now.trunc_subsecs(6);
                self.entries.insert(key.to_string(), since);
                self.save()?;
                info!(repo = key, %since, "working tree is dirty, starting the clock");
                Observation::FirstSeenDirty(since)
            }
            (true, Some(mut since)) => {
                let committed = last_commit_date()?;
                if since < committed {
                    since = committed.trunc_subsecs(6);
                    self.entries.insert(key.to_string(), since);
                    self.save()?;
                    debug!(repo = key, %since, "moved dirty-since to last commit");
                }
                Observation::StillDirty {
                    since,
                    stale: is_stale(since, now),
                }
            }
        };
        Ok(observation)
    }
}

pub fn is_stale(since: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> bool {
    now.signed_duration_since(since) > Duration::days(STALE_AFTER_DAYS)
}

fn parse_line(line: &str) -> Option<(String, DateTime<FixedOffset>)> {
    let (key, stamp) = line.split_once('\t')?;
    let since = DateTime::parse_from_rfc3339(stamp.trim()).ok()?;
    Some((key.to_string(), since))
}
