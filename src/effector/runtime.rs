#![allow(clippy::module_name_repetitions)]
//! Compose tool discovery.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use which::which;

/// Which compose front-end to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeFlavor {
    /// Prefer the `docker compose` plugin, fall back to standalone `docker-compose`.
    #[default]
    Auto,
    /// `docker compose`
    Plugin,
    /// `docker-compose`
    Standalone,
}

/// A resolved compose invocation: program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProgram {
    pub program: PathBuf,
    pub prefix: Vec<String>,
}

impl ComposeProgram {
    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for p in &self.prefix {
            s.push(' ');
            s.push_str(p);
        }
        s
    }
}

fn docker_disabled_by_env() -> bool {
    env::var("BRANCHENV_SKIP_DOCKER").ok().as_deref() == Some("1")
}

pub fn container_runtime_path() -> io::Result<PathBuf> {
    // Allow tests or callers to explicitly disable Docker detection to avoid hard failures
    if docker_disabled_by_env() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }
    which("docker").map_err(|_| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Docker is required but was not found in PATH.",
        )
    })
}

fn plugin_available(docker: &PathBuf) -> bool {
    Command::new(docker)
        .args(["compose", "version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn standalone_path() -> io::Result<PathBuf> {
    if docker_disabled_by_env() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }
    which("docker-compose").map_err(|_| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "docker-compose was not found in PATH.",
        )
    })
}

pub fn resolve_compose(flavor: ComposeFlavor) -> io::Result<ComposeProgram> {
    match flavor {
        ComposeFlavor::Plugin => {
            let docker = container_runtime_path()?;
            if !plugin_available(&docker) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "the docker compose plugin is not installed.",
                ));
            }
            Ok(ComposeProgram {
                program: docker,
                prefix: vec!["compose".to_string()],
            })
        }
        ComposeFlavor::Standalone => Ok(ComposeProgram {
            program: standalone_path()?,
            prefix: Vec::new(),
        }),
        ComposeFlavor::Auto => {
            if let Ok(docker) = container_runtime_path() {
                if plugin_available(&docker) {
                    return Ok(ComposeProgram {
                        program: docker,
                        prefix: vec!["compose".to_string()],
                    });
                }
            }
            standalone_path()
                .map(|program| ComposeProgram {
                    program,
                    prefix: Vec::new(),
                })
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        "neither `docker compose` nor `docker-compose` is available.",
                    )
                })
        }
    }
}
