//! Composition Effector: the capability that starts or stops one container group.

pub mod runtime;

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::instrument;

use crate::errors::EffectorError;
use crate::util::{tail_chars, ExecRequest, ExecService};

pub use runtime::{resolve_compose, ComposeFlavor, ComposeProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeAction {
    /// `up -d`
    Up,
    /// `down`
    Down,
}

pub trait ComposeEffector: Send + Sync {
    /// Verify the compose tool is usable. `EffectorError::NotFound` aborts a whole pass.
    fn probe(&self) -> Result<(), EffectorError>;

    fn bring_up(&self, manifest: &Path, env_file: &Path, project: &str) -> Result<(), EffectorError>;

    fn bring_down(&self, manifest: &Path, env_file: &Path, project: &str)
        -> Result<(), EffectorError>;
}

/// Arguments after the program: `[prefix..] -f <manifest> --env-file <env> -p <project> <action>`.
pub fn compose_args(
    prefix: &[String],
    manifest: &Path,
    env_file: &Path,
    project: &str,
    action: ComposeAction,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = prefix.iter().map(OsString::from).collect();
    args.push("-f".into());
    args.push(manifest.into());
    args.push("--env-file".into());
    args.push(env_file.into());
    args.push("-p".into());
    args.push(project.into());
    match action {
        ComposeAction::Up => {
            args.push("up".into());
            args.push("-d".into());
        }
        ComposeAction::Down => args.push("down".into()),
    }
    args
}

/// Drives `docker compose` / `docker-compose`, each call bounded by a timeout.
#[derive(Debug)]
pub struct DockerCompose {
    flavor: ComposeFlavor,
    exec: ExecService,
    resolved: OnceCell<ComposeProgram>,
}

impl DockerCompose {
    pub fn new(flavor: ComposeFlavor, timeout: Duration) -> Self {
        Self {
            flavor,
            exec: ExecService::new(timeout),
            resolved: OnceCell::new(),
        }
    }

    fn program(&self) -> Result<&ComposeProgram, EffectorError> {
        self.resolved.get_or_try_init(|| {
            let p = resolve_compose(self.flavor).map_err(|e| EffectorError::NotFound(e.to_string()))?;
            tracing::debug!(compose = %p.display(), "resolved compose tool");
            Ok(p)
        })
    }

    fn invoke(
        &self,
        manifest: &Path,
        env_file: &Path,
        project: &str,
        action: ComposeAction,
    ) -> Result<(), EffectorError> {
        let prog = self.program()?;
        let mut req = ExecRequest::new(&prog.program).args(compose_args(
            &prog.prefix,
            manifest,
            env_file,
            project,
            action,
        ));
        if let Some(dir) = manifest.parent().filter(|d| !d.as_os_str().is_empty()) {
            req = req.cwd(dir);
        }
        let out = self.exec.run(req)?;
        tracing::debug!(project, ?action, duration = ?out.duration, code = ?out.status.code(), "compose finished");
        if out.success() {
            Ok(())
        } else {
            Err(EffectorError::Failed {
                code: out.status.code(),
                stderr: tail_chars(&out.stderr, 400),
            })
        }
    }
}

impl ComposeEffector for DockerCompose {
    fn probe(&self) -> Result<(), EffectorError> {
        self.program().map(|_| ())
    }

    #[instrument(level = "info", skip(self, manifest, env_file))]
    fn bring_up(&self, manifest: &Path, env_file: &Path, project: &str) -> Result<(), EffectorError> {
        self.invoke(manifest, env_file, project, ComposeAction::Up)
    }

    #[instrument(level = "info", skip(self, manifest, env_file))]
    fn bring_down(
        &self,
        manifest: &Path,
        env_file: &Path,
        project: &str,
    ) -> Result<(), EffectorError> {
        self.invoke(manifest, env_file, project, ComposeAction::Down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: &[OsString]) -> Vec<String> {
        v.iter().map(|s| s.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_compose_args_up_plugin() {
        let args = compose_args(
            &["compose".to_string()],
            Path::new("/envs/feature42pay/docker-compose.yml"),
            Path::new("/envs/feature42pay/.env"),
            "feature42pay",
            ComposeAction::Up,
        );
        assert_eq!(
            strs(&args),
            vec![
                "compose",
                "-f",
                "/envs/feature42pay/docker-compose.yml",
                "--env-file",
                "/envs/feature42pay/.env",
                "-p",
                "feature42pay",
                "up",
                "-d"
            ]
        );
    }

    #[test]
    fn test_compose_args_down_standalone() {
        let args = compose_args(
            &[],
            Path::new("m.yml"),
            Path::new(".env"),
            "p",
            ComposeAction::Down,
        );
        assert_eq!(strs(&args), vec!["-f", "m.yml", "--env-file", ".env", "-p", "p", "down"]);
    }

    #[test]
    fn test_skip_docker_env_makes_probe_not_found() {
        std::env::set_var("BRANCHENV_SKIP_DOCKER", "1");
        let fx = DockerCompose::new(ComposeFlavor::Auto, Duration::from_secs(1));
        let res = fx.probe();
        std::env::remove_var("BRANCHENV_SKIP_DOCKER");
        assert!(matches!(res, Err(EffectorError::NotFound(_))), "got {res:?}");
    }
}
