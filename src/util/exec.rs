use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::errors::ExecError;

/// Structured command execution with a timeout; stdout and stderr are always captured.
#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn run(&self, request: ExecRequest) -> Result<ExecOutput, ExecError> {
        let program = request.program.to_string_lossy().to_string();
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(program = %program, args = ?request.args, "exec");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExecError::NotFound(program.clone())
            } else {
                ExecError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe
        // while we sit in wait_timeout.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let timeout = self.default_timeout;
        let started = Instant::now();
        let status = if timeout.is_zero() {
            child.wait().map_err(|e| ExecError::Wait {
                program: program.clone(),
                source: e,
            })?
        } else {
            match child.wait_timeout(timeout).map_err(|e| ExecError::Wait {
                program: program.clone(),
                source: e,
            })? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(program = %program, ?timeout, "command timed out; killed");
                    return Err(ExecError::TimedOut {
                        program,
                        after: timeout,
                    });
                }
            }
        };

        let duration = started.elapsed();
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        Ok(ExecOutput {
            status,
            duration,
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: io::Read + Send + 'static>(mut r: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = r.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(h: Option<std::thread::JoinHandle<String>>) -> String {
    h.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[derive(Debug, Default)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_not_found() {
        let svc = ExecService::default();
        let err = svc
            .run(ExecRequest::new("branchenv-definitely-not-a-real-binary"))
            .expect_err("spawn should fail");
        assert!(matches!(err, ExecError::NotFound(_)), "got {err:?}");
    }

    #[test]
    fn test_timeout_kills_child() {
        let svc = ExecService::new(Duration::from_millis(200));
        let started = Instant::now();
        let err = svc
            .run(ExecRequest::new("sh").args(["-c", "sleep 5"]))
            .expect_err("should time out");
        assert!(matches!(err, ExecError::TimedOut { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_captures_stdout_and_env() {
        let svc = ExecService::default();
        let out = svc
            .run(
                ExecRequest::new("sh")
                    .args(["-c", "printf '%s' \"$BRANCHENV_PROBE\""])
                    .env("BRANCHENV_PROBE", "hello"),
            )
            .expect("run sh");
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }
}
