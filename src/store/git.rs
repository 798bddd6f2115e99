//! git as the Descriptor Store's synchronization layer: pull before deciding,
//! stage/commit/push a new descriptor, and undo our own steps when a push is rejected.

use std::path::Path;
use std::time::Duration;

use crate::branch::BranchId;
use crate::errors::{ExecError, StoreError};
use crate::util::{tail_chars, ExecOutput, ExecRequest, ExecService};

#[derive(Debug, Clone)]
pub struct GitSync {
    exec: ExecService,
    remote: String,
    branch: Option<String>,
    author: Option<(String, String)>,
}

impl GitSync {
    pub fn new(remote: impl Into<String>, branch: Option<String>, timeout: Duration) -> Self {
        Self {
            exec: ExecService::new(timeout),
            remote: remote.into(),
            branch: branch.filter(|b| !b.trim().is_empty()),
            author: None,
        }
    }

    /// Commit identity passed as `-c user.name/-c user.email`; otherwise git's own config applies.
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Some((name.into(), email.into()));
        self
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn run(&self, root: &Path, args: &[&str]) -> Result<ExecOutput, ExecError> {
        let mut req = ExecRequest::new("git").arg("-C").arg(root);
        if let Some((name, email)) = &self.author {
            req = req
                .arg("-c")
                .arg(format!("user.name={name}"))
                .arg("-c")
                .arg(format!("user.email={email}"));
        }
        req = req.args(args.iter().copied()).env("GIT_TERMINAL_PROMPT", "0");
        self.exec.run(req)
    }

    fn step(&self, root: &Path, step: &'static str, args: &[&str]) -> Result<(), StoreError> {
        let out = self.run(root, args)?;
        if out.success() {
            Ok(())
        } else {
            Err(StoreError::Sync {
                step,
                detail: tail_chars(&out.stderr, 400),
            })
        }
    }

    pub fn pull(&self, root: &Path) -> Result<(), StoreError> {
        let mut args = vec!["pull", "--ff-only", "--quiet"];
        if let Some(b) = &self.branch {
            args.push(&self.remote);
            args.push(b);
        }
        self.step(root, "pull", &args)
    }

    /// Stage, commit and push only `<root>/<id>`. A failed step undoes the earlier ones,
    /// so the worktree is left with the directory present but untracked and uncommitted.
    pub fn publish(&self, root: &Path, id: &BranchId, message: &str) -> Result<(), StoreError> {
        let path = id.as_str();
        self.step(root, "add", &["add", "--", path])?;

        if let Err(e) = self.step(root, "commit", &["commit", "--quiet", "-m", message, "--", path]) {
            self.unstage(root, id);
            return Err(e);
        }

        let refspec = match &self.branch {
            Some(b) => format!("HEAD:{b}"),
            None => "HEAD".to_string(),
        };
        if let Err(e) = self.step(root, "push", &["push", "--quiet", &self.remote, &refspec]) {
            self.drop_head_commit(root);
            self.unstage(root, id);
            return Err(e);
        }
        tracing::info!(branch_id = %id, remote = %self.remote, "descriptor pushed");
        Ok(())
    }

    /// Best-effort: remove `<id>` from the index. Works on an unborn branch too.
    pub fn unstage(&self, root: &Path, id: &BranchId) {
        let res = self.step(
            root,
            "rm --cached",
            &["rm", "-r", "-q", "--cached", "--ignore-unmatch", "--", id.as_str()],
        );
        if let Err(e) = res {
            tracing::warn!(branch_id = %id, error = %e, "could not unstage descriptor");
        }
    }

    fn drop_head_commit(&self, root: &Path) {
        let has_parent = self
            .run(root, &["rev-parse", "-q", "--verify", "HEAD~1"])
            .map(|o| o.success())
            .unwrap_or(false);
        let res = if has_parent {
            self.step(root, "reset", &["reset", "-q", "--mixed", "HEAD~1"])
        } else {
            self.step(root, "update-ref", &["update-ref", "-d", "HEAD"])
        };
        if let Err(e) = res {
            tracing::error!(error = %e, "could not undo local commit after failed push");
        }
    }
}
