//! Kind/name selector lists
//!
//! Selector lists are comma separated `kind[/name]` entries such as
//! `"dc,svc/frontend"`. Every entry is stored in canonical form: trimmed,
//! lowercase, with the kind pluralized (`dc` becomes `deploymentconfigs`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const KIND_RC: &str = "replicationcontrollers";
pub const KIND_DC: &str = "deploymentconfigs";
pub const KIND_BC: &str = "buildconfigs";
pub const KIND_IS: &str = "imagestreams";

/// Token that selects every object
pub const ALL: &str = "all";

fn vowel_then_y() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[aeiou]y$").expect("static regex"))
}

/// Pluralize a single kind, expanding the common oc shorthands
pub fn pluralize_kind(kind: &str) -> String {
    let kind = kind.trim().to_lowercase();

    if kind.is_empty() {
        return kind;
    }

    let kind = match kind.as_str() {
        "dc" => KIND_DC.to_string(),
        "bc" => KIND_BC.to_string(),
        "svc" => "services".to_string(),
        "is" => KIND_IS.to_string(),
        "rc" => KIND_RC.to_string(),
        "po" => "pods".to_string(),
        _ => kind,
    };

    if kind.ends_with('s') {
        kind
    } else if !kind.ends_with('y') || vowel_then_y().is_match(&kind) {
        kind + "s"
    } else {
        format!("{}ies", &kind[..kind.len() - 1])
    }
}

/// Normalize a `kind` or `kind/name` token to its canonical form
pub fn normalize(token: &str) -> String {
    let token = token.trim().to_lowercase();

    if token.is_empty() || token == ALL {
        return token;
    }

    match token.split_once('/') {
        Some((kind, name)) => format!("{}/{}", pluralize_kind(kind), name),
        None => pluralize_kind(&token),
    }
}

/// Build the canonical `kind/name` identifier of an object
pub fn full_name(kind: &str, name: &str) -> String {
    normalize(&format!("{}/{}", kind, name))
}

/// Derive `kind/name` from a working-tree path `<kind>/<name>.json`
pub fn full_name_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name
        .strip_suffix(".json")
        .or_else(|| name.strip_suffix(".yaml"))
        .unwrap_or(&name)
        .to_string();
    let kind = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|k| k.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!("{}/{}", kind, name)
}

/// An ordered list of normalized selector entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KindNameList {
    entries: Vec<String>,
}

impl KindNameList {
    /// Parse a comma separated selector list; blank entries are dropped
    pub fn parse(list: &str) -> Self {
        let entries = list
            .split(',')
            .map(normalize)
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { entries }
    }

    /// List containing only the `all` token
    pub fn all() -> Self {
        Self {
            entries: vec![ALL.to_string()],
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_all(&self) -> bool {
        self.entries.iter().any(|entry| entry == ALL)
    }

    /// Whether the object identified by `full_name` is covered by this list.
    ///
    /// An entry covers an object when it is `all`, equals the full name, or
    /// is a bare kind matching the object's kind. Names never match partially.
    pub fn matches(&self, full_name: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry == ALL
                || entry == full_name
                || (!entry.contains('/')
                    && full_name
                        .strip_prefix(entry.as_str())
                        .is_some_and(|rest| rest.starts_with('/')))
        })
    }
}

impl From<String> for KindNameList {
    fn from(list: String) -> Self {
        Self::parse(&list)
    }
}

impl From<KindNameList> for String {
    fn from(list: KindNameList) -> Self {
        list.entries.join(",")
    }
}

impl std::str::FromStr for KindNameList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
