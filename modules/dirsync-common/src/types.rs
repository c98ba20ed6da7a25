//! Wire and domain types shared across the engine, store, and API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Attribute map of one directory entry. BTreeMap keeps iteration and JSON
/// encoding deterministic.
pub type EntryContent = BTreeMap<String, AttrValue>;

/// One attribute value element. Source entries only ever produce `Text`;
/// hook responses may carry heterogeneous scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Stringify for the target directory. Non-text scalars use their
    /// canonical display form.
    pub fn render(&self) -> String {
        match self {
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Text(s)
    }
}

/// A single attribute value: a scalar, or an ordered sequence.
///
/// The distinction matters to the target writer: sequence-by-construction
/// attributes get union-merge semantics on modify, scalars are replaced
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

impl AttrValue {
    pub fn is_list(&self) -> bool {
        matches!(self, AttrValue::List(_))
    }

    /// Flatten into the element sequence, scalars as one element.
    pub fn into_elements(self) -> Vec<ScalarValue> {
        match self {
            AttrValue::Scalar(v) => vec![v],
            AttrValue::List(items) => items,
        }
    }

    /// All values rendered as strings, scalars as a one-element sequence.
    pub fn rendered(&self) -> Vec<String> {
        match self {
            AttrValue::Scalar(v) => vec![v.render()],
            AttrValue::List(items) => items.iter().map(ScalarValue::render).collect(),
        }
    }

    pub fn text(s: &str) -> Self {
        AttrValue::Scalar(ScalarValue::Text(s.to_string()))
    }

    pub fn texts<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::List(
            items
                .into_iter()
                .map(|s| ScalarValue::Text(s.into()))
                .collect(),
        )
    }
}

/// A durable description of one polling query against the source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    pub id: String,
    pub filter: String,
    /// Poll interval in seconds. Ignored when `oneshot`.
    pub refresh: u64,
    /// Search base; `None` falls back to the configured source base DN.
    #[serde(rename = "baseDN", default, skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,
    #[serde(default)]
    pub oneshot: bool,
}

impl SearchSpec {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.id.trim().is_empty() {
            return Err(SyncError::Validation("search id must not be empty".into()));
        }
        if self.filter.trim().is_empty() {
            return Err(SyncError::Validation(format!(
                "search '{}': filter must not be empty",
                self.id
            )));
        }
        if !self.oneshot && self.refresh < 1 {
            return Err(SyncError::Validation(format!(
                "search '{}': refresh must be at least 1 second",
                self.id
            )));
        }
        Ok(())
    }
}

/// The last-seen snapshot of one source entry within one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub dn: String,
    pub content: EntryContent,
}

/// A target-directory write request produced by a hook. The DN and any text
/// value may contain `$name` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedEntry {
    pub dn: String,
    pub content: EntryContent,
}

/// One decoded hook response. All fields are optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default)]
    pub transformed: Vec<TransformedEntry>,
    #[serde(default)]
    pub derived: Vec<SearchSpec>,
    /// Dependency DNs shared by every entry in `transformed`. May contain
    /// `$name` placeholders.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Name→value bindings; an explicit null marks the name as known-absent.
    #[serde(default)]
    pub bindings: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HookResponseBody {
    Many(Vec<HookResponse>),
    One(HookResponse),
}

impl HookResponse {
    /// Decode a hook response body, which is either a single object or a
    /// JSON array of them. Normalizes to a sequence.
    pub fn parse_many(body: &str) -> Result<Vec<HookResponse>, serde_json::Error> {
        Ok(match serde_json::from_str::<HookResponseBody>(body)? {
            HookResponseBody::Many(items) => items,
            HookResponseBody::One(item) => vec![item],
        })
    }
}

/// Normalized DN form used for resolver keys and the per-DN write lock.
/// The original casing is preserved for LDAP operations and log messages.
pub fn normalize_dn(dn: &str) -> String {
    dn.trim().to_lowercase()
}
