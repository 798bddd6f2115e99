//! Reconciler: one stateless pass over the Descriptor Store, converging container
//! groups toward each descriptor's status marker.
//!
//! Per-branch problems are isolated: a missing file or an unrecognized marker is a
//! skip, an unreadable/malformed file or a failed compose call is an error, and
//! neither stops the pass. Only a missing compose tool aborts the pass.

use std::io::Cursor;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::branch::BranchId;
use crate::effector::{ComposeAction, ComposeEffector};
use crate::errors::{EffectorError, ReconcileError, StoreError};
use crate::store::{DescriptorPaths, DescriptorStore, StatusMarker, ENV_FILE, MANIFEST_FILE, STATUS_FILE};

/// What to do with descriptors marked `inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InactivePolicy {
    /// Leave containers alone; operators stop environments out-of-band.
    #[default]
    Ignore,
    /// Run `compose down` for inactive descriptors.
    Stop,
}

/// Why a descriptor cannot be acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorProblem {
    MissingFile(&'static str),
    UnrecognizedStatus(String),
    Unreadable(String),
    MalformedManifest(String),
    MalformedEnvFile(String),
}

impl DescriptorProblem {
    /// Errors are reported as `errored`; the rest as `skipped`.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DescriptorProblem::Unreadable(_)
                | DescriptorProblem::MalformedManifest(_)
                | DescriptorProblem::MalformedEnvFile(_)
        )
    }

    pub fn describe(&self) -> String {
        match self {
            DescriptorProblem::MissingFile(name) => format!("missing {name}"),
            DescriptorProblem::UnrecognizedStatus(s) => {
                format!("unrecognized status marker '{}'", s.trim())
            }
            DescriptorProblem::Unreadable(e) => format!("unreadable: {e}"),
            DescriptorProblem::MalformedManifest(e) => format!("malformed {MANIFEST_FILE}: {e}"),
            DescriptorProblem::MalformedEnvFile(e) => format!("malformed {ENV_FILE}: {e}"),
        }
    }
}

/// One descriptor as seen at the start of a pass.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub id: BranchId,
    pub paths: DescriptorPaths,
    /// The status marker alone.
    pub status: Result<StatusMarker, DescriptorProblem>,
    /// Presence and syntax of the manifest and environment file.
    pub files: Result<(), DescriptorProblem>,
}

fn read<S: DescriptorStore + ?Sized>(
    store: &S,
    id: &BranchId,
    name: &'static str,
) -> Result<String, DescriptorProblem> {
    match store.read_file(id, name) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(DescriptorProblem::MissingFile(name)),
        Err(e) => Err(DescriptorProblem::Unreadable(e.to_string())),
    }
}

fn check_manifest(s: &str) -> Result<(), DescriptorProblem> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(s).map_err(|e| DescriptorProblem::MalformedManifest(e.to_string()))?;
    match doc.as_mapping() {
        Some(m) if m.contains_key("services") => Ok(()),
        _ => Err(DescriptorProblem::MalformedManifest(
            "expected a mapping with a 'services' key".to_string(),
        )),
    }
}

fn check_env_file(s: &str) -> Result<(), DescriptorProblem> {
    for item in dotenvy::from_read_iter(Cursor::new(s.as_bytes())) {
        item.map_err(|e| DescriptorProblem::MalformedEnvFile(e.to_string()))?;
    }
    Ok(())
}

fn inspect_status<S: DescriptorStore + ?Sized>(
    store: &S,
    id: &BranchId,
) -> Result<StatusMarker, DescriptorProblem> {
    let status = read(store, id, STATUS_FILE)?;
    StatusMarker::parse(&status).ok_or(DescriptorProblem::UnrecognizedStatus(status))
}

fn inspect_files<S: DescriptorStore + ?Sized>(
    store: &S,
    id: &BranchId,
) -> Result<(), DescriptorProblem> {
    // Presence first, so "missing" wins over "malformed" in diagnostics.
    let manifest = read(store, id, MANIFEST_FILE)?;
    let env_file = read(store, id, ENV_FILE)?;
    check_manifest(&manifest)?;
    check_env_file(&env_file)
}

/// Read every descriptor and derive its state. Fresh on every call.
pub fn snapshot<S: DescriptorStore + ?Sized>(store: &S) -> Result<Vec<SnapshotEntry>, StoreError> {
    let ids = store.list()?;
    Ok(ids
        .into_iter()
        .map(|id| SnapshotEntry {
            paths: store.paths(&id),
            status: inspect_status(store, &id),
            files: inspect_files(store, &id),
            id,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BranchOutcome {
    Started,
    Stopped,
    Skipped { reason: String },
    Errored { reason: String },
}

impl BranchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BranchOutcome::Started => "started",
            BranchOutcome::Stopped => "stopped",
            BranchOutcome::Skipped { .. } => "skipped",
            BranchOutcome::Errored { .. } => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub id: BranchId,
    pub status: Option<StatusMarker>,
    #[serde(flatten)]
    pub outcome: BranchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub started_at: String,
    pub policy: InactivePolicy,
    pub branches: Vec<BranchReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub started: usize,
    pub stopped: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl ReconcileReport {
    pub fn counts(&self) -> ReportCounts {
        let mut c = ReportCounts::default();
        for b in &self.branches {
            match b.outcome {
                BranchOutcome::Started => c.started += 1,
                BranchOutcome::Stopped => c.stopped += 1,
                BranchOutcome::Skipped { .. } => c.skipped += 1,
                BranchOutcome::Errored { .. } => c.errored += 1,
            }
        }
        c
    }

    pub fn has_errors(&self) -> bool {
        self.branches
            .iter()
            .any(|b| matches!(b.outcome, BranchOutcome::Errored { .. }))
    }

    pub fn get(&self, id: &str) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.id.as_str() == id)
    }
}

pub struct Reconciler<'a, S: DescriptorStore + ?Sized, E: ComposeEffector + ?Sized> {
    store: &'a S,
    effector: &'a E,
    policy: InactivePolicy,
}

impl<'a, S: DescriptorStore + ?Sized, E: ComposeEffector + ?Sized> Reconciler<'a, S, E> {
    pub fn new(store: &'a S, effector: &'a E, policy: InactivePolicy) -> Self {
        Self {
            store,
            effector,
            policy,
        }
    }

    #[instrument(level = "info", skip_all, fields(store = %self.store.location(), policy = ?self.policy))]
    pub fn reconcile_all(&self) -> Result<ReconcileReport, ReconcileError> {
        let started_at = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
        self.effector.probe().map_err(|e| ReconcileError::EffectorNotFound(e.to_string()))?;

        let entries = snapshot(self.store)?;
        let mut branches = Vec::with_capacity(entries.len());
        for entry in entries {
            let status = entry.status.as_ref().ok().copied();
            let outcome = self.converge(&entry)?;
            match &outcome {
                BranchOutcome::Started | BranchOutcome::Stopped => {
                    tracing::debug!(branch_id = %entry.id, outcome = outcome.label(), "converged")
                }
                BranchOutcome::Skipped { reason } => {
                    tracing::debug!(branch_id = %entry.id, reason = %reason, "skipped")
                }
                BranchOutcome::Errored { reason } => {
                    tracing::debug!(branch_id = %entry.id, reason = %reason, "errored")
                }
            }
            branches.push(BranchReport {
                id: entry.id,
                status,
                outcome,
            });
        }

        let report = ReconcileReport {
            started_at,
            policy: self.policy,
            branches,
        };
        let c = report.counts();
        tracing::debug!(
            started = c.started,
            stopped = c.stopped,
            skipped = c.skipped,
            errored = c.errored,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Decide and act for one descriptor. Only a vanished compose tool escapes as `Err`.
    fn converge(&self, entry: &SnapshotEntry) -> Result<BranchOutcome, ReconcileError> {
        let marker = match &entry.status {
            Ok(m) => *m,
            Err(p) if p.is_error() => return Ok(BranchOutcome::Errored { reason: p.describe() }),
            Err(p) => return Ok(BranchOutcome::Skipped { reason: p.describe() }),
        };
        let action = match (marker, self.policy) {
            (StatusMarker::Active, _) => ComposeAction::Up,
            (StatusMarker::Inactive, InactivePolicy::Stop) => ComposeAction::Down,
            (StatusMarker::Inactive, InactivePolicy::Ignore) | (StatusMarker::Absent, _) => {
                return Ok(BranchOutcome::Skipped {
                    reason: marker.to_string(),
                })
            }
        };
        // Manifest and env file only matter once compose is about to read them.
        match &entry.files {
            Ok(()) => {}
            Err(p) if p.is_error() => return Ok(BranchOutcome::Errored { reason: p.describe() }),
            Err(p) => return Ok(BranchOutcome::Skipped { reason: p.describe() }),
        }
        let p = &entry.paths;
        let project = entry.id.as_str();
        let (result, done) = match action {
            ComposeAction::Up => (
                self.effector.bring_up(&p.manifest, &p.env_file, project),
                BranchOutcome::Started,
            ),
            ComposeAction::Down => (
                self.effector.bring_down(&p.manifest, &p.env_file, project),
                BranchOutcome::Stopped,
            ),
        };
        match result {
            Ok(()) => Ok(done),
            Err(EffectorError::NotFound(msg)) => Err(ReconcileError::EffectorNotFound(msg)),
            Err(e) => Ok(BranchOutcome::Errored {
                reason: e.to_string(),
            }),
        }
    }
}
