#![allow(clippy::module_name_repetitions)]
//! Small utilities: process execution, atomic file writes, text checks.

pub mod exec;
pub mod fs;

pub use exec::{ExecOutput, ExecRequest, ExecService};

/// Reject strings containing newline, carriage return, or NUL before embedding them
/// into a single-line file format.
///
/// Keep error text stable (tests depend on it).
pub fn reject_newlines(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        Err(format!("refusing to embed {what}: contains newline"))
    } else {
        Ok(())
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`, the portable environment-variable name set.
pub fn is_env_key(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a value for a YAML double-quoted scalar.
pub fn yaml_double_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Escape `$` so compose interpolation leaves the value as written.
pub fn compose_literal(s: &str) -> String {
    s.replace('$', "$$")
}

/// Last `max` characters of a (possibly long) tool output, for one-line diagnostics.
pub fn tail_chars(s: &str, max: usize) -> String {
    let t = s.trim();
    let n = t.chars().count();
    if n <= max {
        t.to_string()
    } else {
        let skip = n - max;
        format!("…{}", t.chars().skip(skip).collect::<String>())
    }
}
