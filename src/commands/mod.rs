use std::path::Path;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use branchenv::{
    color_enabled_stderr, exit_code_for_init_error, exit_code_for_io_error,
    exit_code_for_reconcile_error, exit_code_for_store_error, log_error_stderr, log_info_stderr,
    log_warn_stderr, snapshot, try_acquire_lock_at, BranchOutcome, Config, DescriptorStore,
    DockerCompose, FsStore, GitSync, InactivePolicy, InitOutcome, Initializer, LockPurpose,
    ReconcileReport, Reconciler, TemplateSet, TriggerVars,
};

/// Filesystem store for `cfg`, synchronized through git when enabled.
pub(crate) fn build_store(cfg: &Config) -> FsStore {
    let store = FsStore::new(cfg.store.clone());
    if !cfg.git.enabled {
        return store;
    }
    let mut git = GitSync::new(
        cfg.git.remote.clone(),
        cfg.git.branch.clone(),
        cfg.git.timeout,
    );
    if let (Some(name), Some(email)) = (&cfg.git.author_name, &cfg.git.author_email) {
        git = git.with_author(name.clone(), email.clone());
    }
    store.with_git(git)
}

fn load_templates(cfg: &Config) -> Result<TemplateSet, branchenv::RenderError> {
    match &cfg.templates {
        Some(dir) => TemplateSet::load_dir(dir),
        None => Ok(TemplateSet::builtin()),
    }
}

/// Pretty JSON on stdout; `false` when serialization failed (already reported).
fn print_json<T: serde::Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            true
        }
        Err(e) => {
            log_error_stderr(color_enabled_stderr(), &format!("branchenv: {e}"));
            false
        }
    }
}

fn json_exit(value: &impl serde::Serialize) -> ExitCode {
    ExitCode::from(if print_json(value) { 0 } else { 1 })
}

pub(crate) fn run_init(
    cfg: &Config,
    cli_vars: &[(String, String)],
    dry_run: bool,
    json: bool,
) -> ExitCode {
    let use_err = color_enabled_stderr();
    let templates = match load_templates(cfg) {
        Ok(t) => t,
        Err(e) => {
            log_error_stderr(use_err, &format!("branchenv: {e}"));
            return ExitCode::from(2);
        }
    };

    let mut vars = cfg.trigger_env.collect(std::env::vars());
    vars.merge(cli_vars.iter().fold(TriggerVars::new(), |t, (k, v)| {
        t.with(k.clone(), v.clone())
    }));

    let store = build_store(cfg);
    let initializer = Initializer::new(&store, &templates, cfg.init_settings());

    if dry_run {
        let (trigger, rendered) = match initializer.preview(&vars) {
            Ok(p) => p,
            Err(e) => {
                log_error_stderr(use_err, &format!("branchenv: {e}"));
                return ExitCode::from(exit_code_for_init_error(&e));
            }
        };
        if json {
            return json_exit(&serde_json::json!({
                "id": trigger.id,
                "url": trigger.id.url(&cfg.init_settings().base_domain),
                "files": rendered.files,
            }));
        }
        for (name, contents) in &rendered.files {
            println!("# --- {}/{} ---", trigger.id, name);
            print!("{contents}");
            if !contents.ends_with('\n') {
                println!();
            }
        }
        log_info_stderr(
            use_err,
            &format!("branchenv: dry-run for {}; store not modified.", trigger.id),
        );
        return ExitCode::from(0);
    }

    let outcome = match initializer.initialize(&vars) {
        Ok(o) => o,
        Err(e) => {
            log_error_stderr(use_err, &format!("branchenv: {e}"));
            return ExitCode::from(exit_code_for_init_error(&e));
        }
    };
    let code = match &outcome {
        InitOutcome::Created { id, url } => {
            log_info_stderr(use_err, &format!("branchenv: {id}: created ({url})"));
            0
        }
        InitOutcome::Skipped { id } => {
            log_warn_stderr(use_err, &format!("branchenv: {id}: skipped (already exists)"));
            0
        }
        InitOutcome::Failed { id, reason } => {
            log_error_stderr(use_err, &format!("branchenv: {id}: failed: {reason}"));
            1
        }
    };
    if json && !print_json(&outcome) {
        return ExitCode::from(1);
    }
    ExitCode::from(code)
}

fn print_report(report: &ReconcileReport, use_err: bool) {
    for b in &report.branches {
        match &b.outcome {
            BranchOutcome::Started | BranchOutcome::Stopped => {
                log_info_stderr(use_err, &format!("branchenv: {}: {}", b.id, b.outcome.label()))
            }
            BranchOutcome::Skipped { reason } => {
                log_warn_stderr(use_err, &format!("branchenv: {}: skipped ({reason})", b.id))
            }
            BranchOutcome::Errored { reason } => {
                log_error_stderr(use_err, &format!("branchenv: {}: errored: {reason}", b.id))
            }
        }
    }
    let c = report.counts();
    let summary = format!(
        "branchenv: pass finished: {} started, {} stopped, {} skipped, {} errored",
        c.started, c.stopped, c.skipped, c.errored
    );
    if c.errored > 0 {
        log_warn_stderr(use_err, &summary);
    } else {
        log_info_stderr(use_err, &summary);
    }
}

/// One guarded pass. Returns the exit code for this pass.
fn reconcile_once(
    store: &FsStore,
    reconciler: &Reconciler<'_, FsStore, DockerCompose>,
    lock_path: &Path,
    sync: bool,
    json: bool,
) -> u8 {
    let use_err = color_enabled_stderr();
    let _guard = match try_acquire_lock_at(lock_path) {
        Ok(Some(g)) => g,
        Ok(None) => {
            tracing::debug!(lock = %lock_path.display(), "previous pass still running; tick skipped");
            log_warn_stderr(
                use_err,
                "branchenv: another reconciliation pass holds the store; skipping this tick.",
            );
            return 0;
        }
        Err(e) => {
            log_error_stderr(
                use_err,
                &format!("branchenv: cannot lock {}: {e}", lock_path.display()),
            );
            return exit_code_for_io_error(&e);
        }
    };
    if sync {
        if let Err(e) = store.refresh() {
            log_error_stderr(use_err, &format!("branchenv: store sync failed: {e}"));
            return exit_code_for_store_error(&e);
        }
    }
    match reconciler.reconcile_all() {
        Ok(report) => {
            if json && !print_json(&report) {
                return 1;
            }
            print_report(&report, use_err);
            u8::from(report.has_errors())
        }
        Err(e) => {
            log_error_stderr(use_err, &format!("branchenv: {e}"));
            exit_code_for_reconcile_error(&e)
        }
    }
}

pub(crate) fn run_reconcile(
    cfg: &Config,
    json: bool,
    interval: Option<Duration>,
    sync: bool,
    stop_inactive: bool,
) -> ExitCode {
    let store = build_store(cfg);
    let effector = DockerCompose::new(cfg.compose, cfg.effector_timeout);
    let policy = if stop_inactive {
        InactivePolicy::Stop
    } else {
        cfg.inactive_policy
    };
    let reconciler = Reconciler::new(&store, &effector, policy);
    let lock_path = branchenv::lock_path_for(store.root(), LockPurpose::Reconcile);

    let Some(every) = interval else {
        return ExitCode::from(reconcile_once(&store, &reconciler, &lock_path, sync, json));
    };
    log_info_stderr(
        color_enabled_stderr(),
        &format!(
            "branchenv: reconciling {} every {}",
            store.root().display(),
            humantime::format_duration(every)
        ),
    );
    loop {
        let code = reconcile_once(&store, &reconciler, &lock_path, sync, json);
        tracing::debug!(code, next_in = %humantime::format_duration(every), "tick done");
        thread::sleep(every);
    }
}

pub(crate) fn run_list(cfg: &Config, json: bool) -> ExitCode {
    let use_err = color_enabled_stderr();
    // Trimmed the same way the initializer trims it.
    let base_domain = cfg.init_settings().base_domain;
    let store = FsStore::new(cfg.store.clone());
    let entries = match snapshot(&store) {
        Ok(e) => e,
        Err(e) => {
            log_error_stderr(use_err, &format!("branchenv: {e}"));
            return ExitCode::from(exit_code_for_store_error(&e));
        }
    };
    if json {
        let rows: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| match &e.status {
                Ok(marker) => serde_json::json!({
                    "id": e.id,
                    "status": marker,
                    "url": e.id.url(&base_domain),
                    "problem": e.files.as_ref().err().map(|p| p.describe()),
                    "dir": e.paths.dir,
                }),
                Err(p) => serde_json::json!({
                    "id": e.id,
                    "status": null,
                    "problem": p.describe(),
                    "dir": e.paths.dir,
                }),
            })
            .collect();
        return json_exit(&rows);
    }
    if entries.is_empty() {
        log_info_stderr(
            use_err,
            &format!("branchenv: no descriptors under {}", store.location()),
        );
        return ExitCode::from(0);
    }
    for e in &entries {
        match &e.status {
            Ok(marker) => match &e.files {
                Ok(()) => println!("{}\t{}\t{}", e.id, marker, e.id.url(&base_domain)),
                Err(p) => println!("{}\t{}\t{}", e.id, marker, p.describe()),
            },
            Err(p) => println!("{}\t-\t{}", e.id, p.describe()),
        }
    }
    ExitCode::from(0)
}
