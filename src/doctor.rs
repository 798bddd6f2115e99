use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use branchenv::effector::resolve_compose;
use branchenv::util::{fs::dir_writable, ExecRequest, ExecService};
use branchenv::{paint, Config, DescriptorStore, FsStore};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

fn first_line_of(exec: &ExecService, program: &Path, args: &[&str]) -> Option<String> {
    let out = exec
        .run(ExecRequest::new(program).args(args.iter().copied()))
        .ok()?;
    if !out.success() {
        return None;
    }
    out.stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Print diagnostics to stderr. Non-zero when the compose tool or the store is unusable.
pub(crate) fn run_doctor(cfg: &Config, verbose: bool) -> ExitCode {
    let use_err = branchenv::color_enabled_stderr();
    let val = |s: &str| paint(use_err, "\x1b[34;1m", s);
    let bad = |s: &str| paint(use_err, "\x1b[31;1m", s);
    let exec = ExecService::new(PROBE_TIMEOUT);
    let mut healthy = true;

    eprintln!("branchenv doctor");
    eprintln!();
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  host:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    eprintln!();

    // Composition effector
    match resolve_compose(cfg.compose) {
        Ok(prog) => {
            eprintln!("  compose:         {}", val(&prog.display()));
            let mut args: Vec<&str> = prog.prefix.iter().map(String::as_str).collect();
            args.push("version");
            if let Some(v) = first_line_of(&exec, &prog.program, &args) {
                eprintln!("  compose version: {}", val(&v));
            }
        }
        Err(e) => {
            healthy = false;
            eprintln!("  compose:         {}", bad(&format!("not found ({e})")));
        }
    }
    eprintln!(
        "  effector timeout: {}",
        humantime::format_duration(cfg.effector_timeout)
    );
    eprintln!();

    // Git
    match which::which("git") {
        Ok(p) => {
            let v = first_line_of(&exec, &p, &["--version"]).unwrap_or_else(|| "(unknown)".into());
            eprintln!("  git:        {}", val(&v));
        }
        Err(_) => {
            let msg = if cfg.git.enabled {
                healthy = false;
                bad("not found (required: git.enabled=true)")
            } else {
                "not found".to_string()
            };
            eprintln!("  git:        {msg}");
        }
    }
    let sync = if cfg.git.enabled {
        format!(
            "{} -> {}",
            cfg.git.remote,
            cfg.git.branch.as_deref().unwrap_or("(upstream)")
        )
    } else {
        "disabled".to_string()
    };
    eprintln!("  store sync: {}", val(&sync));
    eprintln!();

    // Descriptor store
    let root = cfg.store.as_path();
    eprintln!("  store:     {}", val(&root.display().to_string()));
    let (exists, writable) = (root.is_dir(), dir_writable(root));
    let state = match (exists, writable) {
        (true, true) => val("present, writable"),
        (true, false) => {
            healthy = false;
            bad("present, not writable")
        }
        (false, _) => "absent (created on first init)".to_string(),
    };
    eprintln!("  store dir: {state}");
    if exists {
        match FsStore::new(root).list() {
            Ok(ids) => {
                eprintln!("  descriptors: {}", val(&ids.len().to_string()));
                if verbose {
                    for id in ids {
                        eprintln!("    - {id}");
                    }
                }
            }
            Err(e) => {
                healthy = false;
                eprintln!("  descriptors: {}", bad(&e.to_string()));
            }
        }
    }
    let templates = cfg
        .templates
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(built-in)".to_string());
    eprintln!("  templates: {}", val(&templates));
    eprintln!("  base domain: {}", val(&cfg.base_domain));
    eprintln!();

    if healthy {
        eprintln!("doctor: completed diagnostics.");
        ExitCode::from(0)
    } else {
        eprintln!("doctor: completed diagnostics with problems.");
        ExitCode::from(1)
    }
}
