#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use branchenv::{ComposeEffector, EffectorError, TriggerVars};

pub fn have_git() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking with stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

pub fn trigger(pairs: &[(&str, &str)]) -> TriggerVars {
    pairs
        .iter()
        .fold(TriggerVars::new(), |t, (k, v)| t.with(*k, *v))
}

/// Relative path -> bytes for every file under `root`.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    if !root.exists() {
        return out;
    }
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.expect("walk");
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).expect("prefix").to_path_buf();
            out.insert(rel, std::fs::read(entry.path()).expect("read"));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub action: &'static str,
    pub project: String,
    pub manifest: PathBuf,
    pub env_file: PathBuf,
}

/// Compose effector that records calls instead of running docker.
#[derive(Debug, Default)]
pub struct RecordingEffector {
    calls: Mutex<Vec<Call>>,
    failing: Vec<String>,
    timing_out: Vec<String>,
    missing: bool,
}

impl RecordingEffector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `bring_up`/`bring_down` fail for this project.
    pub fn failing_for(mut self, project: &str) -> Self {
        self.failing.push(project.to_string());
        self
    }

    /// `bring_up`/`bring_down` hit the compose timeout for this project.
    pub fn timing_out_for(mut self, project: &str) -> Self {
        self.timing_out.push(project.to_string());
        self
    }

    /// The compose tool is not installed.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn projects(&self, action: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .map(|c| c.project)
            .collect()
    }

    fn record(
        &self,
        action: &'static str,
        manifest: &Path,
        env_file: &Path,
        project: &str,
    ) -> Result<(), EffectorError> {
        if self.missing {
            return Err(EffectorError::NotFound("docker".to_string()));
        }
        self.calls.lock().unwrap().push(Call {
            action,
            project: project.to_string(),
            manifest: manifest.to_path_buf(),
            env_file: env_file.to_path_buf(),
        });
        if self.timing_out.iter().any(|p| p == project) {
            return Err(EffectorError::TimedOut(Duration::from_secs(300)));
        }
        if self.failing.iter().any(|p| p == project) {
            return Err(EffectorError::Failed {
                code: Some(1),
                stderr: "no such image".to_string(),
            });
        }
        Ok(())
    }
}

impl ComposeEffector for RecordingEffector {
    fn probe(&self) -> Result<(), EffectorError> {
        if self.missing {
            return Err(EffectorError::NotFound("docker".to_string()));
        }
        Ok(())
    }

    fn bring_up(&self, manifest: &Path, env_file: &Path, project: &str) -> Result<(), EffectorError> {
        self.record("up", manifest, env_file, project)
    }

    fn bring_down(
        &self,
        manifest: &Path,
        env_file: &Path,
        project: &str,
    ) -> Result<(), EffectorError> {
        self.record("down", manifest, env_file, project)
    }
}
