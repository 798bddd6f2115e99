//! Template Renderer.
//!
//! Syntax is intentionally tiny:
//! - `{{ NAME }}` substitutes a binding.
//! - `{{ NAME | indent(N) }}` substitutes a binding and prefixes every non-empty line
//!   after the first with `N` spaces, so a multi-line block lands under a YAML key.
//!
//! Rendering is pure and all-or-nothing: an unresolved placeholder, unknown filter
//! or unterminated `{{` fails the whole set.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::errors::RenderError;
use crate::store::{ENV_FILE, MANIFEST_FILE, STATUS_FILE};

/// Variable name -> value.
pub type Bindings = BTreeMap<String, String>;

pub const TEMPLATE_SUFFIX: &str = ".tpl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Output file name.
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Templates compiled into the binary.
    pub fn builtin() -> Self {
        Self::new(vec![
            Template {
                name: MANIFEST_FILE.to_string(),
                source: include_str!("../templates/docker-compose.yml.tpl").to_string(),
            },
            Template {
                name: ENV_FILE.to_string(),
                source: include_str!("../templates/.env.tpl").to_string(),
            },
            Template {
                name: STATUS_FILE.to_string(),
                source: include_str!("../templates/status.tpl").to_string(),
            },
        ])
    }

    /// Load every `*.tpl` file directly inside `dir`; output name drops the suffix.
    pub fn load_dir(dir: &Path) -> Result<Self, RenderError> {
        let mut templates = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| RenderError::Load {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = file_name.strip_suffix(TEMPLATE_SUFFIX) else {
                continue;
            };
            let source =
                std::fs::read_to_string(entry.path()).map_err(|e| RenderError::Load {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                })?;
            templates.push(Template {
                name: name.to_string(),
                source,
            });
        }
        tracing::debug!(dir = %dir.display(), count = templates.len(), "loaded templates");
        Ok(Self::new(templates))
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }
}

/// Rendered output, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedSet {
    pub files: BTreeMap<String, String>,
}

impl RenderedSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }
}

/// Render every template, then check the descriptor artifacts are all present.
pub fn render(set: &TemplateSet, bindings: &Bindings) -> Result<RenderedSet, RenderError> {
    let mut files = BTreeMap::new();
    for t in set.templates() {
        let out = render_str(&t.name, &t.source, bindings)?;
        files.insert(t.name.clone(), out);
    }
    for required in [MANIFEST_FILE, ENV_FILE, STATUS_FILE] {
        if !files.contains_key(required) {
            return Err(RenderError::MissingArtifact(required.to_string()));
        }
    }
    Ok(RenderedSet { files })
}

/// Render a single template source. `template` only labels errors.
pub fn render_str(template: &str, src: &str, bindings: &Bindings) -> Result<String, RenderError> {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    let mut offset = 0usize;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let end = body.find("}}").ok_or_else(|| RenderError::Unterminated {
            template: template.to_string(),
            offset: offset + start,
        })?;
        out.push_str(&eval(template, &body[..end], bindings)?);
        let advance = start + 2 + end + 2;
        offset += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);
    Ok(out)
}

fn eval(template: &str, expr: &str, bindings: &Bindings) -> Result<String, RenderError> {
    let mut parts = expr.split('|');
    let name = parts.next().unwrap_or_default().trim();
    let mut value = bindings
        .get(name)
        .cloned()
        .ok_or_else(|| RenderError::Unresolved {
            template: template.to_string(),
            name: name.to_string(),
        })?;
    for filter in parts {
        value = apply_filter(template, filter.trim(), &value)?;
    }
    Ok(value)
}

fn apply_filter(template: &str, filter: &str, value: &str) -> Result<String, RenderError> {
    let (fname, arg) = match filter.split_once('(') {
        Some((f, a)) => (f.trim(), Some(a)),
        None => (filter, None),
    };
    match fname {
        "indent" => {
            let bad = || RenderError::BadFilterArgument {
                template: template.to_string(),
                filter: fname.to_string(),
            };
            let width: usize = arg
                .and_then(|a| a.trim().strip_suffix(')'))
                .and_then(|a| a.trim().parse().ok())
                .ok_or_else(bad)?;
            Ok(indent(value, width))
        }
        _ => Err(RenderError::UnknownFilter {
            template: template.to_string(),
            filter: fname.to_string(),
        }),
    }
}

fn indent(value: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut out = String::with_capacity(value.len());
    for (i, line) in value.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
            }
        }
        out.push_str(line);
    }
    out
}
