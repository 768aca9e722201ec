//! Run configuration.
//!
//! Loaded from `<continent>/.expedition/config.toml` when present, then
//! overlaid by the caller (CLI flags, env) and validated once with
//! [`ExpeditionConfig::validate`] before a run starts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::ModelReserve;
use crate::domain::error::{PaintressError, Result, ValidationError};
use crate::git::is_git_repo;

/// Per-continent state directory.
pub const EXPEDITION_DIR: &str = ".expedition";

/// Config file name inside [`EXPEDITION_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Language the agent prompt is rendered in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ja,
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ja" | "japanese" => Ok(Language::Ja),
            other => Err(ValidationError::UnknownLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::En => "en",
            Language::Ja => "ja",
        })
    }
}

/// Issue-tracker query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Team key (e.g. `MY`).
    pub team: String,
    /// Optional project name filter.
    pub project: Option<String>,
    /// State allow-list; empty accepts all states.
    pub states: Vec<String>,
}

/// Everything one expedition run consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpeditionConfig {
    /// Target repository.
    pub continent: PathBuf,

    /// Working-copy pool size. `0` runs directly in the continent.
    pub workers: usize,

    /// Budget for the Implementing phase of one cycle, in seconds.
    pub timeout_secs: u64,

    /// Maximum cycles dispatched per run.
    pub max_cycles: usize,

    /// Branch pull requests target and worktrees fork from.
    pub base_branch: String,

    /// Model reserve in fallback order.
    pub models: Vec<String>,

    /// Agent executable.
    pub agent_cmd: String,

    /// Extra agent arguments inserted before the prompt.
    pub agent_args: Vec<String>,

    /// Start the dev server before dispatching cycles.
    pub dev_server: bool,

    pub dev_cmd: Option<String>,

    /// Run once per working copy before its first cycle.
    pub setup_cmd: Option<String>,

    /// Post-PR review command, run inside the working copy.
    pub review_cmd: Option<String>,

    /// Regex over review output that marks a failed review even on exit 0.
    pub review_fail_pattern: Option<String>,

    /// Print prompts instead of invoking the agent; skip setup, publish, review.
    pub dry_run: bool,

    pub lang: Language,

    /// Git remote branches are pushed to.
    pub remote: String,

    /// Seconds a child process gets to exit on cancellation before it is killed.
    pub cancel_grace_secs: u64,

    /// Write one JSON line per cycle outcome under `.expedition/journal`.
    pub journal: bool,

    pub tracker: TrackerConfig,
}

impl Default for ExpeditionConfig {
    fn default() -> Self {
        Self {
            continent: PathBuf::from("."),
            workers: 1,
            timeout_secs: 1980,
            max_cycles: 50,
            base_branch: "main".to_string(),
            models: vec!["opus".to_string()],
            agent_cmd: "claude".to_string(),
            agent_args: Vec::new(),
            dev_server: true,
            dev_cmd: None,
            setup_cmd: None,
            review_cmd: None,
            review_fail_pattern: None,
            dry_run: false,
            lang: Language::En,
            remote: "origin".to_string(),
            cancel_grace_secs: 10,
            journal: true,
            tracker: TrackerConfig::default(),
        }
    }
}

impl ExpeditionConfig {
    /// Defaults bound to `continent`.
    pub fn for_continent(continent: impl Into<PathBuf>) -> Self {
        Self {
            continent: continent.into(),
            ..Self::default()
        }
    }

    /// Load `<continent>/.expedition/config.toml`, falling back to defaults
    /// when the file is absent. The continent path always wins over the file.
    pub fn load(continent: impl Into<PathBuf>) -> Result<Self> {
        let continent = continent.into();
        let path = continent.join(EXPEDITION_DIR).join(CONFIG_FILE);
        let mut config = if path.is_file() {
            debug!(path = %path.display(), "loading expedition config");
            Self::from_toml(&std::fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        config.continent = continent;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PaintressError::Config(e.to_string()))
    }

    /// Validate once at run start. Canonicalizes the continent path.
    pub fn validate(&mut self) -> Result<()> {
        if !self.continent.exists() {
            return Err(ValidationError::ContinentMissing(self.continent.clone()).into());
        }
        self.continent = self.continent.canonicalize()?;
        if !is_git_repo(&self.continent) {
            return Err(ValidationError::NotARepository(self.continent.clone()).into());
        }
        ModelReserve::new(self.models.clone())?;
        if self.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout.into());
        }
        if self.max_cycles == 0 {
            return Err(ValidationError::ZeroBudget.into());
        }
        if self.base_branch.trim().is_empty() {
            return Err(ValidationError::EmptyBaseBranch.into());
        }
        self.review_fail_regex()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn model_reserve(&self) -> Result<ModelReserve> {
        ModelReserve::new(self.models.clone())
    }

    pub fn review_fail_regex(&self) -> Result<Option<Regex>> {
        self.review_fail_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    PaintressError::from(ValidationError::InvalidReviewPattern(e.to_string()))
                })
            })
            .transpose()
    }

    pub fn expedition_dir(&self) -> PathBuf {
        self.continent.join(EXPEDITION_DIR)
    }

    /// Root under which pooled worktrees are created.
    pub fn worktree_root(&self) -> PathBuf {
        self.expedition_dir().join(".run").join("worktrees")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.expedition_dir().join("journal")
    }

    /// Dev server command to start, if this run should start one.
    pub fn dev_server_command(&self) -> Option<&str> {
        if !self.dev_server || self.dry_run {
            return None;
        }
        self.dev_cmd.as_deref().filter(|c| !c.trim().is_empty())
    }
}
