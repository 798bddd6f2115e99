use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Parse a `KEY=VALUE` trigger variable.
fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err("expected KEY=VALUE".to_string()),
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s.trim()).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(d)
}

#[derive(Parser, Debug)]
#[command(
    name = "branchenv",
    version,
    about = "Create per-branch review environments and keep their containers converged.",
    after_long_help = "Examples:\n  branchenv init --var branch=feature/42-pay --var project=shop\n  branchenv init --dry-run\n  branchenv reconcile --interval 30s --sync\n  branchenv list --json\n\n",
    after_help = "\n"
)]
pub(crate) struct Cli {
    /// Configuration file (default: $BRANCHENV_CONFIG, then ./branchenv.yml)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Descriptor store directory (overrides config and BRANCHENV_STORE)
    #[arg(long, global = true)]
    pub(crate) store: Option<PathBuf>,

    /// Print detailed execution info
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<branchenv::ColorMode>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Materialize the descriptor for one branch, once
    Init {
        /// Trigger variable (repeatable); wins over the environment
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Render and print the descriptor without touching the store
        #[arg(long = "dry-run")]
        dry_run: bool,
        /// Emit the outcome as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Converge running containers toward every descriptor's status
    Reconcile {
        /// Emit the pass report as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Repeat the pass every DURATION (e.g. 30s, 5m) until interrupted
        #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
        interval: Option<Duration>,
        /// Pull the store from its git remote before each pass
        #[arg(long)]
        sync: bool,
        /// Run `compose down` for inactive descriptors (overrides inactive_policy)
        #[arg(long = "stop-inactive")]
        stop_inactive: bool,
    },
    /// List descriptors and their status markers
    List {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Run diagnostics to check environment and configuration
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("branch=feature/a=b").unwrap(),
            ("branch".to_string(), "feature/a=b".to_string())
        );
        assert_eq!(parse_var("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("often").is_err());
    }

    #[test]
    fn test_cli_parses_reconcile_flags() {
        let cli = Cli::parse_from([
            "branchenv",
            "--store",
            "/srv/envs",
            "reconcile",
            "--interval",
            "1m",
            "--stop-inactive",
        ]);
        assert_eq!(cli.store, Some(PathBuf::from("/srv/envs")));
        match cli.command {
            Command::Reconcile {
                interval,
                stop_inactive,
                sync,
                json,
            } => {
                assert_eq!(interval, Some(Duration::from_secs(60)));
                assert!(stop_inactive);
                assert!(!sync);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
