//! Initializer: materialize a descriptor the first time a branch is seen.
//!
//! Order of operations matters for the failure model:
//! 1. validate the trigger (no mutation on precondition failure),
//! 2. refresh the store and check existence (`Skipped` when present),
//! 3. render everything in memory (no mutation on render failure),
//! 4. atomically create the directory (`Skipped` if a concurrent run won),
//! 5. write and publish, rolling the directory back on any failure.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::instrument;

use crate::branch::{normalize, BranchId};
use crate::config::{InitialStatus, DEFAULT_BASE_DOMAIN};
use crate::errors::InitError;
use crate::store::{CreateOutcome, DescriptorStore};
use crate::template::{render, Bindings, RenderedSet, TemplateSet};
use crate::util::{compose_literal, is_env_key, reject_newlines, yaml_double_quote};

/// Env-file keys the templates already own; extra variables may not shadow them.
const RESERVED_ENV_KEYS: [&str; 4] = ["IMAGE_TAG", "URL", "BRANCH", "PROJECT_ID"];

/// Characters refused in branch names and project ids, which land unquoted in the env file.
const UNSAFE_CHARS: &[char] = &['\'', '"', '$', '#', '`', '\\'];

/// Flat trigger input. Canonical keys are lowercase; every other key is an extra variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerVars(BTreeMap<String, String>);

impl TriggerVars {
    pub const BRANCH: &'static str = "branch";
    pub const PROJECT: &'static str = "project";
    pub const SOURCE_BRANCH: &'static str = "source_branch";
    pub const ACTIVE_BRANCH: &'static str = "active_branch";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merge `other` over `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: TriggerVars) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn is_canonical(key: &str) -> bool {
        matches!(
            key,
            Self::BRANCH | Self::PROJECT | Self::SOURCE_BRANCH | Self::ACTIVE_BRANCH
        )
    }

    fn required(&self, key: &'static str) -> Result<String, InitError> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(InitError::MissingVariable(key))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Check preconditions and resolve defaults.
    pub fn validate(&self) -> Result<Trigger, InitError> {
        let branch = self.required(Self::BRANCH)?;
        let project = self.required(Self::PROJECT)?;
        let source_branch = self.optional(Self::SOURCE_BRANCH).unwrap_or_else(|| branch.clone());
        let active_branch = self.optional(Self::ACTIVE_BRANCH).unwrap_or_else(|| branch.clone());

        for (name, value) in [
            (Self::BRANCH, &branch),
            (Self::PROJECT, &project),
            (Self::SOURCE_BRANCH, &source_branch),
            (Self::ACTIVE_BRANCH, &active_branch),
        ] {
            if value.chars().any(|c| c.is_whitespace() || UNSAFE_CHARS.contains(&c)) {
                return Err(InitError::InvalidVariable {
                    name: name.to_string(),
                    reason: "contains whitespace, a quote, '$', '#' or a backslash".to_string(),
                });
            }
        }

        let mut extras = BTreeMap::new();
        for (k, v) in &self.0 {
            if Self::is_canonical(k) {
                continue;
            }
            if !is_env_key(k) {
                return Err(InitError::InvalidVariable {
                    name: k.clone(),
                    reason: "not a valid environment variable name".to_string(),
                });
            }
            if RESERVED_ENV_KEYS.contains(&k.as_str()) {
                return Err(InitError::InvalidVariable {
                    name: k.clone(),
                    reason: "reserved by the environment file".to_string(),
                });
            }
            reject_newlines(v, &format!("value of '{k}'")).map_err(|reason| {
                InitError::InvalidVariable {
                    name: k.clone(),
                    reason,
                }
            })?;
            if v.contains('\'') {
                return Err(InitError::InvalidVariable {
                    name: k.clone(),
                    reason: "single quotes are not supported in extra values".to_string(),
                });
            }
            extras.insert(k.clone(), v.clone());
        }

        let id = BranchId::from_raw(&branch).ok_or_else(|| InitError::InvalidBranch(branch.clone()))?;
        let service_name = normalize(&active_branch);
        if service_name.is_empty() {
            return Err(InitError::InvalidVariable {
                name: Self::ACTIVE_BRANCH.to_string(),
                reason: "has no alphanumeric characters".to_string(),
            });
        }

        Ok(Trigger {
            id,
            branch,
            project,
            source_branch,
            active_branch,
            service_name,
            extras,
        })
    }
}

/// A validated trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub id: BranchId,
    pub branch: String,
    pub project: String,
    pub source_branch: String,
    pub active_branch: String,
    pub service_name: String,
    pub extras: BTreeMap<String, String>,
}

/// Values baked into every new descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSettings {
    pub base_domain: String,
    pub image: String,
    pub network: String,
    pub port: u16,
    pub initial_status: InitialStatus,
}

impl Default for InitSettings {
    fn default() -> Self {
        Self {
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            image: "registry.example.internal/app".to_string(),
            network: "web".to_string(),
            port: 8080,
            initial_status: InitialStatus::Active,
        }
    }
}

fn env_file_value(v: &str) -> String {
    if !v.is_empty()
        && v
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@+,=".contains(c))
    {
        v.to_string()
    } else {
        format!("'{v}'")
    }
}

/// Template bindings for a validated trigger.
pub fn build_bindings(trigger: &Trigger, settings: &InitSettings) -> Bindings {
    let id = trigger.id.as_str();
    let mut b = Bindings::new();
    let mut put = |k: &str, v: String| {
        b.insert(k.to_string(), v);
    };
    put("BRANCH_ID", id.to_string());
    put("URL", trigger.id.url(&settings.base_domain));
    put("BASE_DOMAIN", settings.base_domain.clone());
    put("SOURCE_BRANCH", trigger.source_branch.clone());
    put("ACTIVE_BRANCH", trigger.active_branch.clone());
    put("SERVICE_NAME", trigger.service_name.clone());
    put("PROJECT_ID", trigger.project.clone());
    put("IMAGE", settings.image.clone());
    put("IMAGE_TAG", id.to_string());
    put("NETWORK", settings.network.clone());
    put("PORT", settings.port.to_string());
    put("INITIAL_STATUS", settings.initial_status.marker().to_string());
    put(
        "EXTRA_ENV",
        trigger
            .extras
            .iter()
            .map(|(k, v)| format!("{k}: {}", yaml_double_quote(&compose_literal(v))))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    put(
        "EXTRA_ENV_FILE",
        trigger
            .extras
            .iter()
            .map(|(k, v)| format!("{k}={}", env_file_value(v)))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    b
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum InitOutcome {
    Created { id: BranchId, url: String },
    /// A descriptor already exists; nothing was touched.
    Skipped { id: BranchId },
    /// Writing or publishing failed and the local directory was rolled back.
    Failed { id: BranchId, reason: String },
}

impl InitOutcome {
    pub fn id(&self) -> &BranchId {
        match self {
            InitOutcome::Created { id, .. }
            | InitOutcome::Skipped { id }
            | InitOutcome::Failed { id, .. } => id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InitOutcome::Created { .. } => "created",
            InitOutcome::Skipped { .. } => "skipped",
            InitOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct Initializer<'a, S: DescriptorStore + ?Sized> {
    store: &'a S,
    templates: &'a TemplateSet,
    settings: InitSettings,
}

impl<'a, S: DescriptorStore + ?Sized> Initializer<'a, S> {
    pub fn new(store: &'a S, templates: &'a TemplateSet, settings: InitSettings) -> Self {
        Self {
            store,
            templates,
            settings,
        }
    }

    /// Validate and render without touching the store.
    pub fn preview(&self, vars: &TriggerVars) -> Result<(Trigger, RenderedSet), InitError> {
        let trigger = vars.validate()?;
        let rendered = render(self.templates, &build_bindings(&trigger, &self.settings))?;
        Ok((trigger, rendered))
    }

    #[instrument(level = "info", skip_all, fields(branch = vars.get(TriggerVars::BRANCH).unwrap_or("")))]
    pub fn initialize(&self, vars: &TriggerVars) -> Result<InitOutcome, InitError> {
        let trigger = vars.validate()?;
        let id = trigger.id.clone();

        self.store.refresh()?;
        if self.store.exists(&id)? {
            tracing::debug!(branch_id = %id, "descriptor already present; nothing to do");
            return Ok(InitOutcome::Skipped { id });
        }

        let bindings = build_bindings(&trigger, &self.settings);
        let rendered = render(self.templates, &bindings)?;
        let url = trigger.id.url(&self.settings.base_domain);

        match self.store.create_if_absent(&id)? {
            CreateOutcome::Created => {}
            CreateOutcome::AlreadyExists => {
                tracing::debug!(branch_id = %id, "descriptor created concurrently; skipping");
                return Ok(InitOutcome::Skipped { id });
            }
        }

        for (name, contents) in &rendered.files {
            if let Err(e) = self.store.write_file(&id, name, contents) {
                return Ok(self.rollback(id, format!("writing {name}: {e}")));
            }
        }

        let message = format!(
            "Add environment {id} for branch {} (project {})",
            trigger.source_branch, trigger.project
        );
        if let Err(e) = self.store.publish(&id, &message) {
            return Ok(self.rollback(id, format!("publish: {e}")));
        }

        tracing::debug!(branch_id = %id, url = %url, "descriptor created");
        Ok(InitOutcome::Created { id, url })
    }

    fn rollback(&self, id: BranchId, cause: String) -> InitOutcome {
        match self.store.discard(&id) {
            Ok(()) => {
                tracing::debug!(branch_id = %id, cause = %cause, "rolled back unpublished descriptor");
                InitOutcome::Failed { id, reason: cause }
            }
            Err(e) => {
                tracing::debug!(branch_id = %id, cause = %cause, error = %e, "rollback failed");
                InitOutcome::Failed {
                    id,
                    reason: format!("{cause}; rollback failed: {e}"),
                }
            }
        }
    }
}
