use std::env;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::atomic;

/// Where the per-repository `git_archive.json` is looked up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SettingsLocation {
    /// Only `<repo>/git_archive.json`.
    #[default]
    RepoRoot,
    /// `<repo>/.git/git_archive.json`, falling back to the repository root.
    MetadataDirWithFallback,
}

/// How the report file of a walk is named.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationNaming {
    /// Always the configured file, overwritten by every walk.
    #[default]
    Fixed,
    /// A new `<stem>-<YYYYmmdd-HHMMSS>.<ext>` file per walk that found problems.
    Timestamped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Policy {
    #[serde(default)]
    pub settings_location: SettingsLocation,
    #[serde(default)]
    pub notification_naming: NotificationNaming,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Folders searched for repositories that carry a settings file.
    #[serde(default)]
    pub folders: Vec<String>,
    // Defaults to `report.txt` in the config home.
    pub notify_file: Option<PathBuf>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub policy: Policy,
}

fn default_max_depth() -> usize {
    255
}

impl Default for Config {
    fn default() -> Self {
        Config::empty()
    }
}

impl Config {
    pub fn empty() -> Self {
        Self {
            folders: vec![],
            notify_file: None,
            max_depth: default_max_depth(),
            policy: Policy::default(),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_home()?.join("config.toml"))
    }

    /// Location of all state. By default
    ///
    /// Linux   :   $XDG_CONFIG_HOME/git-archive or $HOME/.config/git-archive
    /// macOS   :   $HOME/Library/Application Support/git-archive
    /// Windows :   %AppData%\Roaming\git-archive
    ///
    /// This can be overridden by setting the GIT_ARCHIVE_CONFIG_HOME environment variable.
    pub fn config_home() -> Result<PathBuf> {
        if let Ok(env_var) = env::var("GIT_ARCHIVE_CONFIG_HOME") {
            if !env_var.is_empty() {
                return Ok(env_var.into());
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("git-archive"))
            .ok_or_else(|| {
                anyhow!(
                    "could not find your config directory; set GIT_ARCHIVE_CONFIG_HOME to choose one"
                )
            })
    }

    /// File holding the dirty-since timestamps of every repository.
    pub fn staleness_cache_path() -> Result<PathBuf> {
        Ok(Self::config_home()?.join("dirty-since.tsv"))
    }

    pub fn notify_path(&self) -> Result<PathBuf> {
        match &self.notify_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_home()?.join("report.txt")),
        }
    }

    /// Load Config from the default path, or an empty one when it can't be read.
    pub fn load() -> Self {
        let path = match Self::default_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{e:#}");
                return Self::empty();
            }
        };
        if !path.exists() {
            return Self::empty();
        }
        Self::load_file(&path).unwrap_or_else(|e| {
            warn!(file = %path.display(), "ignoring unreadable config: {e:#}");
            Self::empty()
        })
    }

    /// Load Config from the default path for a read-modify-write. Only a missing
    /// file counts as empty; one that exists but can't be read or parsed is an error.
    pub fn load_strict() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::empty());
        }
        Self::load_file(&path)
    }

    /// Applies `change` to the stored config and saves it when `change` reports a
    /// modification. Nothing is written when the stored file can't be parsed.
    pub fn update<F>(change: F) -> Result<bool>
    where
        F: FnOnce(&mut Config) -> Result<bool>,
    {
        let mut config = Self::load_strict()?;
        let changed = change(&mut config)?;
        if changed {
            config.save()?;
        }
        Ok(changed)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let res = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(res)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::default_path()?)
    }

    pub fn create_dir(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir).with_context(|| {
                format!(
                    "failed to create directory `{}` for `{}`",
                    dir.display(),
                    path.display()
                )
            })?;
        }
        Ok(())
    }

    /// Creates parent dirs, serializes `self` as TOML and replaces `path` with it.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        Self::create_dir(path)?;
        let config_string = toml::to_string(self).context("serializing config")?;
        atomic::write(path, config_string)
    }

    /// Adds a folder to walk. Returns false when it was already there.
    pub fn set_watch(&mut self, path: &Path) -> Result<bool> {
        let abs_path = canonical_string(path)?;

        if self.folders.contains(&abs_path) {
            info!("{abs_path} is already being watched");
            Ok(false)
        } else {
            info!("started watching {abs_path}");
            self.folders.push(abs_path);
            Ok(true)
        }
    }

    /// Removes a folder. Returns false when it wasn't watched.
    pub fn set_unwatch(&mut self, path: &Path) -> Result<bool> {
        let abs_path = canonical_string(path)?;

        let before = self.folders.len();
        self.folders.retain(|folder| folder != &abs_path);
        if self.folders.len() < before {
            info!("stopped watching {abs_path}");
            Ok(true)
        } else {
            info!("{abs_path} is not being watched");
            Ok(false)
        }
    }
}

fn canonical_string(path: &Path) -> Result<String> {
    let abs_path = fs::canonicalize(path)
        .with_context(|| format!("{} is not a directory", path.display()))?;
    abs_path
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} is not valid unicode", abs_path.display()))
}
