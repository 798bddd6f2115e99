//! Branch Identifier: the normalized token naming a descriptor directory,
//! a compose project and a subdomain label.

use std::fmt;

use serde::{Serialize, Serializer};

/// Lowercase `raw` and drop every character that is not ASCII alphanumeric.
///
/// Distinct raw names can collapse to the same token (`feat/a-b` and `feat-ab`);
/// no collision detection is attempted.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(String);

impl BranchId {
    /// Derive the identifier for a raw branch name. `None` when nothing survives normalization.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let id = normalize(raw);
        if id.is_empty() {
            None
        } else {
            Some(BranchId(id))
        }
    }

    /// Accept an existing directory name only if it already is in normalized form.
    pub fn parse_normalized(name: &str) -> Option<Self> {
        if !name.is_empty() && normalize(name) == name {
            Some(BranchId(name.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<id>.<base_domain>`, stable for the lifetime of the descriptor.
    pub fn url(&self, base_domain: &str) -> String {
        format!("{}.{}", self.0, base_domain.trim_start_matches('.'))
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BranchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for BranchId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}
