//! `$name` placeholder substitution.
//!
//! A single-pass lexer over `$[A-Za-z0-9_.]+` tokens with three outcomes per
//! token: splice the bound value, elide a known-null binding, or leave an
//! unknown token literal and flag the string as still missing bindings.
//! Shared by DN, dependency, and content-value resolution.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::types::{AttrValue, EntryContent, ScalarValue, TransformedEntry};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([A-Za-z0-9_.]+)").unwrap());

/// A consistent copy of the binding state. Resolution passes work against a
/// snapshot so concurrent binding updates cannot produce a torn read.
#[derive(Debug, Clone, Default)]
pub struct BindingSnapshot {
    pub values: HashMap<String, String>,
    pub nulls: HashSet<String>,
}

impl BindingSnapshot {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.nulls.is_empty()
    }
}

/// Result of substituting one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// At least one token had no binding and was left literal.
    pub missing: bool,
    /// At least one token resolved to a null binding and was spliced away.
    pub elided: bool,
}

pub fn render_str(input: &str, bindings: &BindingSnapshot) -> Rendered {
    let mut missing = false;
    let mut elided = false;
    let text = TOKEN
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            if let Some(value) = bindings.values.get(name) {
                value.clone()
            } else if bindings.nulls.contains(name) {
                elided = true;
                String::new()
            } else {
                missing = true;
                caps[0].to_string()
            }
        })
        .into_owned();
    Rendered { text, missing, elided }
}

/// Substitute one attribute value. Sequence elements are substituted
/// independently; an element that resolves a null binding is dropped from
/// the sequence entirely. Returns the rendered value and whether any token
/// is still unresolved.
pub fn render_value(value: &AttrValue, bindings: &BindingSnapshot) -> (AttrValue, bool) {
    match value {
        AttrValue::Scalar(ScalarValue::Text(s)) => {
            let r = render_str(s, bindings);
            (AttrValue::Scalar(ScalarValue::Text(r.text)), r.missing)
        }
        AttrValue::Scalar(_) => (value.clone(), false),
        AttrValue::List(items) => {
            let mut missing = false;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    ScalarValue::Text(s) => {
                        let r = render_str(s, bindings);
                        if r.elided {
                            continue;
                        }
                        missing |= r.missing;
                        out.push(ScalarValue::Text(r.text));
                    }
                    other => out.push(other.clone()),
                }
            }
            (AttrValue::List(out), missing)
        }
    }
}

/// Substitute an entry's DN and every content value.
pub fn render_entry(entry: &TransformedEntry, bindings: &BindingSnapshot) -> (TransformedEntry, bool) {
    let dn = render_str(&entry.dn, bindings);
    let mut missing = dn.missing;
    let mut content = EntryContent::new();
    for (name, value) in &entry.content {
        let (rendered, m) = render_value(value, bindings);
        missing |= m;
        content.insert(name.clone(), rendered);
    }
    (
        TransformedEntry {
            dn: dn.text,
            content,
        },
        missing,
    )
}

/// Substitute a list of dependency DN strings.
pub fn render_deps(deps: &[String], bindings: &BindingSnapshot) -> (Vec<String>, bool) {
    let mut missing = false;
    let rendered = deps
        .iter()
        .map(|dep| {
            let r = render_str(dep, bindings);
            missing |= r.missing;
            r.text
        })
        .collect();
    (rendered, missing)
}
