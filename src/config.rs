//! Configuration: optional YAML file, then environment overrides, then CLI flags
//! (applied by the binary).
//!
//! Resolution order for the file: `--config <path>`, `$BRANCHENV_CONFIG`,
//! `./branchenv.yml` when present, otherwise built-in defaults.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::effector::ComposeFlavor;
use crate::initializer::{InitSettings, TriggerVars};
use crate::reconciler::InactivePolicy;
use crate::store::StatusMarker;

pub const DEFAULT_CONFIG_FILE: &str = "branchenv.yml";
pub const DEFAULT_BASE_DOMAIN: &str = "testserver.example.internal";

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

/// Status written into a freshly created descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialStatus {
    #[default]
    Active,
    Inactive,
}

impl InitialStatus {
    pub fn marker(&self) -> StatusMarker {
        match self {
            InitialStatus::Active => StatusMarker::Active,
            InitialStatus::Inactive => StatusMarker::Inactive,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    pub enabled: bool,
    pub remote: String,
    /// Branch to pull from and push to; current upstream when unset.
    pub branch: Option<String>,
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote: "origin".to_string(),
            branch: None,
            timeout: Duration::from_secs(60),
            author_name: None,
            author_email: None,
        }
    }
}

/// Environment variable names the trigger is read from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerEnv {
    pub branch: String,
    pub project: String,
    pub source_branch: String,
    pub active_branch: String,
    /// `<prefix><KEY>=value` becomes extra variable `KEY`.
    pub extra_prefix: String,
}

impl Default for TriggerEnv {
    fn default() -> Self {
        Self {
            branch: "BRANCHENV_BRANCH".to_string(),
            project: "BRANCHENV_PROJECT_ID".to_string(),
            source_branch: "BRANCHENV_SOURCE_BRANCH".to_string(),
            active_branch: "BRANCHENV_ACTIVE_BRANCH".to_string(),
            extra_prefix: "BRANCHENV_EXTRA_".to_string(),
        }
    }
}

impl TriggerEnv {
    /// Build a trigger map from environment pairs. Keys are the canonical trigger names.
    pub fn collect<I>(&self, vars: I) -> TriggerVars
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut out = BTreeMap::new();
        for (k, v) in vars {
            let key = if k == self.branch {
                TriggerVars::BRANCH.to_string()
            } else if k == self.project {
                TriggerVars::PROJECT.to_string()
            } else if k == self.source_branch {
                TriggerVars::SOURCE_BRANCH.to_string()
            } else if k == self.active_branch {
                TriggerVars::ACTIVE_BRANCH.to_string()
            } else if let Some(extra) = k
                .strip_prefix(&self.extra_prefix)
                .filter(|rest| !self.extra_prefix.is_empty() && !rest.is_empty())
            {
                extra.to_string()
            } else {
                continue;
            };
            out.insert(key, v);
        }
        TriggerVars::from_map(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: PathBuf,
    /// Directory of `*.tpl` files; built-in templates when unset.
    pub templates: Option<PathBuf>,
    pub base_domain: String,
    pub image: String,
    pub network: String,
    pub port: u16,
    pub initial_status: InitialStatus,
    pub inactive_policy: InactivePolicy,
    #[serde(deserialize_with = "de_duration")]
    pub effector_timeout: Duration,
    pub compose: ComposeFlavor,
    pub git: GitConfig,
    pub trigger_env: TriggerEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from("environments"),
            templates: None,
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            image: "registry.example.internal/app".to_string(),
            network: "web".to_string(),
            port: 8080,
            initial_status: InitialStatus::Active,
            inactive_policy: InactivePolicy::Ignore,
            effector_timeout: Duration::from_secs(300),
            compose: ComposeFlavor::Auto,
            git: GitConfig::default(),
            trigger_env: TriggerEnv::default(),
        }
    }
}

/// `~` and `~/...` resolve against the user's home directory.
pub fn expand_home(p: &Path) -> PathBuf {
    let Ok(rest) = p.strip_prefix("~") else {
        return p.to_path_buf();
    };
    match home::home_dir() {
        Some(h) => h.join(rest),
        None => p.to_path_buf(),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        // An empty document deserializes as null; treat it as "all defaults".
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(s).context("invalid configuration")?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Resolve, read, override from environment, and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => match non_empty_env("BRANCHENV_CONFIG") {
                Some(p) => Some(PathBuf::from(p)),
                None => {
                    let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                    p.is_file().then_some(p)
                }
            },
        };
        let mut cfg = match &path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        tracing::debug!(config = ?path, "configuration source");
        cfg.apply_env_overrides();
        cfg.store = expand_home(&cfg.store);
        cfg.templates = cfg.templates.as_deref().map(expand_home);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("BRANCHENV_STORE") {
            self.store = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("BRANCHENV_BASE_DOMAIN") {
            self.base_domain = v;
        }
        if let Some(v) = non_empty_env("BRANCHENV_IMAGE") {
            self.image = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let domain = self.base_domain.trim().trim_start_matches('.');
        if domain.is_empty() {
            bail!("base_domain must not be empty");
        }
        if domain.chars().any(|c| c.is_whitespace() || c == '/') {
            bail!("base_domain '{}' is not a host name", self.base_domain);
        }
        if self.image.trim().is_empty() {
            bail!("image must not be empty");
        }
        if self.network.trim().is_empty() {
            bail!("network must not be empty");
        }
        if self.port == 0 {
            bail!("port must be between 1 and 65535");
        }
        if self.effector_timeout.is_zero() {
            bail!("effector_timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn init_settings(&self) -> InitSettings {
        InitSettings {
            base_domain: self.base_domain.trim().trim_start_matches('.').to_string(),
            image: self.image.clone(),
            network: self.network.clone(),
            port: self.port,
            initial_status: self.initial_status,
        }
    }
}
