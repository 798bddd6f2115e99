//! `--color` handling and the painted one-line outcome helpers used by the binary.
//!
//! `--json` output goes to stdout and is never painted.

use clap::ValueEnum;
use once_cell::sync::OnceCell;

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

static COLOR_MODE: OnceCell<ColorMode> = OnceCell::new();

/// Record the `--color` flag. Only the first call wins.
pub fn set_color_mode(mode: ColorMode) {
    let _ = COLOR_MODE.set(mode);
}

/// `NO_COLOR` (https://no-color.org/) beats `--color`, which beats TTY detection.
fn stderr_color(no_color: bool, mode: Option<ColorMode>, is_tty: bool) -> bool {
    if no_color {
        return false;
    }
    match mode.unwrap_or(ColorMode::Auto) {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => is_tty,
    }
}

pub fn color_enabled_stderr() -> bool {
    stderr_color(
        std::env::var_os("NO_COLOR").is_some(),
        COLOR_MODE.get().copied(),
        atty::is(atty::Stream::Stderr),
    )
}

pub fn paint(enabled: bool, code: &str, s: &str) -> String {
    if enabled {
        format!("{code}{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

pub fn log_info_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[36;1m", msg));
}

pub fn log_warn_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[33m", msg));
}

pub fn log_error_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[31;1m", msg));
}
