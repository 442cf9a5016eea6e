use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::ArchiveDestination;
use crate::atomic;
use crate::config::SettingsLocation;

pub const SETTINGS_FILE: &str = "git_archive.json";
pub const METADATA_DIR: &str = ".git";
pub const DEFAULT_BRANCH: &str = "master";

/// Per-repository settings, stored as `git_archive.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RepositorySettings {
    pub archive_folder: String,
    #[serde(default)]
    pub branches: BTreeSet<String>,
}

impl RepositorySettings {
    /// New settings tracking `branches`, or `master` when none are given.
    pub fn new(archive_folder: impl Into<String>, branches: Vec<String>) -> Self {
        let mut branches: BTreeSet<String> = branches.into_iter().collect();
        if branches.is_empty() {
            branches.insert(DEFAULT_BRANCH.to_string());
        }
        Self {
            archive_folder: archive_folder.into(),
            branches,
        }
    }

    pub fn destination(&self) -> ArchiveDestination {
        ArchiveDestination::parse(&self.archive_folder)
    }

    /// Finds the settings file of the repository at `repo_root`, if there is one.
    pub fn locate(repo_root: &Path, location: SettingsLocation) -> Option<PathBuf> {
        let root_file = repo_root.join(SETTINGS_FILE);
        match location {
            SettingsLocation::RepoRoot => root_file.is_file().then_some(root_file),
            SettingsLocation::MetadataDirWithFallback => {
                let meta_file = repo_root.join(METADATA_DIR).join(SETTINGS_FILE);
                if meta_file.is_file() {
                    Some(meta_file)
                } else {
                    root_file.is_file().then_some(root_file)
                }
            }
        }
    }

    /// Path new settings are written to when no file exists yet.
    pub fn default_path(repo_root: &Path, location: SettingsLocation) -> PathBuf {
        let meta_dir = repo_root.join(METADATA_DIR);
        match location {
            SettingsLocation::MetadataDirWithFallback if meta_dir.is_dir() => {
                meta_dir.join(SETTINGS_FILE)
            }
            _ => repo_root.join(SETTINGS_FILE),
        }
    }

    pub fn load(repo_root: &Path, location: SettingsLocation) -> Result<Self> {
        let path = Self::locate(repo_root, location).ok_or_else(|| {
            anyhow!(
                "no {SETTINGS_FILE} found for {}",
                repo_root.display()
            )
        })?;
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!(file = %path.display(), "loaded repository settings");
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        atomic::write(path, json)
    }

    /// Writes the settings next to any existing file, or to the default location.
    pub fn save(&self, repo_root: &Path, location: SettingsLocation) -> Result<PathBuf> {
        let path = Self::locate(repo_root, location)
            .unwrap_or_else(|| Self::default_path(repo_root, location));
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn set_archive_folder(&mut self, folder: impl Into<String>) {
        self.archive_folder = folder.into();
    }

    /// Returns false when the branch was already tracked.
    pub fn add_branch(&mut self, branch: impl Into<String>) -> bool {
        self.branches.insert(branch.into())
    }
}
