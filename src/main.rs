use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod doctor;

use cli::{Cli, Command};

fn load_config(cli: &Cli) -> Result<branchenv::Config> {
    let mut cfg = branchenv::Config::load(cli.config.as_deref())?;
    if let Some(store) = &cli.store {
        cfg.store = branchenv::config::expand_home(store);
    }
    Ok(cfg)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(mode) = cli.color {
        branchenv::set_color_mode(mode);
    }
    let use_err = branchenv::color_enabled_stderr();
    branchenv::init_logging(cli.verbose, use_err);

    let cfg = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            branchenv::log_error_stderr(use_err, &format!("branchenv: {e:#}"));
            return ExitCode::from(2);
        }
    };
    if cli.verbose {
        eprintln!("branchenv: store: {}", cfg.store.display());
    }

    match &cli.command {
        Command::Init {
            vars,
            dry_run,
            json,
        } => commands::run_init(&cfg, vars, *dry_run, *json),
        Command::Reconcile {
            json,
            interval,
            sync,
            stop_inactive,
        } => commands::run_reconcile(&cfg, *json, *interval, *sync, *stop_inactive),
        Command::List { json } => commands::run_list(&cfg, *json),
        Command::Doctor => doctor::run_doctor(&cfg, cli.verbose),
    }
}
