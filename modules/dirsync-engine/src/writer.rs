//! The target writer: apply one resolved entry to the target directory.
//!
//! Writes are serialized per normalized DN. The read-merge-write decision
//! is a pure function (`plan_write`) over the optional existing attribute
//! map, so the merge rules are testable without a directory.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ldap3::{Ldap, Mod, Scope, SearchEntry};
use tokio::sync::Mutex;
use tracing::{debug, info};

use dirsync_common::{normalize_dn, EntryContent, LdapEndpoint, SyncError, TransformedEntry};

use crate::ldap::{connect, ldap_err, ExistingAttrs};

/// Attributes whose target value is the union of existing and supplied
/// values rather than a replacement. Matched case-insensitively.
pub const DEFAULT_MERGE_ATTRIBUTES: &[&str] = &["memberUid"];

const DEFAULT_OBJECT_CLASSES: &[&str] = &["top", "inetOrgPerson"];

/// LDAP noSuchObject: the base-scope read found nothing to modify.
const RC_NO_SUCH_OBJECT: u32 = 32;

#[async_trait]
pub trait DirectoryWriter: Send + Sync {
    /// Apply one resolved entry. Success is the caller's signal to mark the
    /// DN synced.
    async fn apply(&self, entry: &TransformedEntry) -> Result<(), SyncError>;
}

/// The write plan for one entry given the current target state. Attribute
/// values are already stringified.
#[derive(Debug, PartialEq, Eq)]
pub enum WritePlan {
    Add(Vec<(String, Vec<String>)>),
    Modify(Vec<(String, Vec<String>)>),
}

/// Decide ADD vs MODIFY and compute merged values.
///
/// Not-present → ADD every supplied attribute, defaulting `objectClass`
/// when the hook did not provide one. Present → MODIFY-REPLACE each
/// supplied attribute; merge attributes and sequence-by-construction
/// attributes are unioned with the existing values first (first-seen order,
/// deduplicated as strings), scalars replace verbatim.
pub fn plan_write(
    content: &EntryContent,
    existing: Option<&ExistingAttrs>,
    merge_attrs: &HashSet<String>,
) -> WritePlan {
    match existing {
        None => {
            let mut attrs: Vec<(String, Vec<String>)> = content
                .iter()
                .map(|(name, value)| (name.clone(), value.rendered()))
                .collect();
            if !attrs
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("objectClass"))
            {
                attrs.push((
                    "objectClass".to_string(),
                    DEFAULT_OBJECT_CLASSES.iter().map(|c| c.to_string()).collect(),
                ));
            }
            WritePlan::Add(attrs)
        }
        Some(existing) => {
            let mods = content
                .iter()
                .map(|(name, value)| {
                    let supplied = value.rendered();
                    let merge = value.is_list() || merge_attrs.contains(&name.to_lowercase());
                    if !merge {
                        return (name.clone(), supplied);
                    }
                    let current = existing
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v.as_slice())
                        .unwrap_or(&[]);
                    let mut seen = HashSet::new();
                    let mut union = Vec::new();
                    for v in current.iter().chain(supplied.iter()) {
                        if seen.insert(v.clone()) {
                            union.push(v.clone());
                        }
                    }
                    (name.clone(), union)
                })
                .collect();
            WritePlan::Modify(mods)
        }
    }
}

pub struct LdapTargetWriter {
    endpoint: LdapEndpoint,
    /// Lowercased merge-attribute names.
    merge_attrs: HashSet<String>,
    /// Lazily-populated per-DN locks; retained for the process lifetime.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LdapTargetWriter {
    pub fn new(endpoint: LdapEndpoint) -> Self {
        Self {
            endpoint,
            merge_attrs: DEFAULT_MERGE_ATTRIBUTES
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            locks: DashMap::new(),
        }
    }

    fn dn_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Base-scope read of the entry, requesting the merge attributes.
    /// noSuchObject means "not present", not an error.
    async fn read_existing(
        &self,
        ldap: &mut Ldap,
        dn: &str,
    ) -> Result<Option<ExistingAttrs>, SyncError> {
        let mut attrs: Vec<String> = vec!["dn".to_string()];
        attrs.extend(self.merge_attrs.iter().cloned());
        let result = ldap
            .search(dn, Scope::Base, "(objectClass=*)", attrs)
            .await
            .map_err(ldap_err)?;
        match result.success() {
            Ok((entries, _)) => Ok(entries
                .into_iter()
                .next()
                .map(|e| SearchEntry::construct(e).attrs)),
            Err(ldap3::LdapError::LdapResult { result })
                if result.rc == RC_NO_SUCH_OBJECT =>
            {
                Ok(None)
            }
            Err(e) => Err(ldap_err(e)),
        }
    }

    async fn write_locked(
        &self,
        ldap: &mut Ldap,
        entry: &TransformedEntry,
    ) -> Result<(), SyncError> {
        let existing = self.read_existing(ldap, &entry.dn).await?;
        match plan_write(&entry.content, existing.as_ref(), &self.merge_attrs) {
            WritePlan::Add(attrs) => {
                debug!(dn = %entry.dn, attrs = attrs.len(), "Entry absent; adding");
                let attrs: Vec<(String, HashSet<String>)> = attrs
                    .into_iter()
                    .map(|(name, values)| (name, values.into_iter().collect()))
                    .collect();
                ldap.add(&entry.dn, attrs)
                    .await
                    .map_err(ldap_err)?
                    .success()
                    .map_err(ldap_err)?;
                info!(dn = %entry.dn, "Added target entry");
            }
            WritePlan::Modify(mods) => {
                debug!(dn = %entry.dn, mods = mods.len(), "Entry present; replacing attributes");
                let mods: Vec<Mod<String>> = mods
                    .into_iter()
                    .map(|(name, values)| Mod::Replace(name, values.into_iter().collect()))
                    .collect();
                ldap.modify(&entry.dn, mods)
                    .await
                    .map_err(ldap_err)?
                    .success()
                    .map_err(ldap_err)?;
                info!(dn = %entry.dn, "Modified target entry");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryWriter for LdapTargetWriter {
    async fn apply(&self, entry: &TransformedEntry) -> Result<(), SyncError> {
        let key = normalize_dn(&entry.dn);
        let lock = self.dn_lock(&key);
        let _guard = lock.lock().await;

        let mut ldap = connect(&self.endpoint).await?;
        let outcome = self.write_locked(&mut ldap, entry).await;
        let _ = ldap.unbind().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_common::AttrValue;

    fn merge_attrs() -> HashSet<String> {
        DEFAULT_MERGE_ATTRIBUTES
            .iter()
            .map(|a| a.to_lowercase())
            .collect()
    }

    fn content(pairs: &[(&str, AttrValue)]) -> EntryContent {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn absent_entry_gets_add_with_default_object_class() {
        let plan = plan_write(
            &content(&[("cn", AttrValue::text("grp"))]),
            None,
            &merge_attrs(),
        );
        let WritePlan::Add(attrs) = plan else {
            panic!("expected ADD");
        };
        assert!(attrs.contains(&("cn".to_string(), vec!["grp".to_string()])));
        assert!(attrs.contains(&(
            "objectClass".to_string(),
            vec!["top".to_string(), "inetOrgPerson".to_string()]
        )));
    }

    #[test]
    fn supplied_object_class_is_not_overridden() {
        let plan = plan_write(
            &content(&[("objectclass", AttrValue::texts(["top", "posixGroup"]))]),
            None,
            &merge_attrs(),
        );
        let WritePlan::Add(attrs) = plan else {
            panic!("expected ADD");
        };
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].1, vec!["top", "posixGroup"]);
    }

    #[test]
    fn merge_attribute_unions_with_existing_values() {
        let existing: ExistingAttrs =
            [("memberUid".to_string(), vec!["alice".to_string()])].into_iter().collect();
        let plan = plan_write(
            &content(&[("memberUid", AttrValue::texts(["bob"]))]),
            Some(&existing),
            &merge_attrs(),
        );
        assert_eq!(
            plan,
            WritePlan::Modify(vec![(
                "memberUid".to_string(),
                vec!["alice".to_string(), "bob".to_string()]
            )])
        );
    }

    #[test]
    fn merge_union_is_order_stable_and_deduplicated() {
        let existing: ExistingAttrs = [(
            "memberUid".to_string(),
            vec!["alice".to_string(), "bob".to_string()],
        )]
        .into_iter()
        .collect();
        let plan = plan_write(
            &content(&[("memberUid", AttrValue::texts(["bob", "carol"]))]),
            Some(&existing),
            &merge_attrs(),
        );
        assert_eq!(
            plan,
            WritePlan::Modify(vec![(
                "memberUid".to_string(),
                vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
            )])
        );
    }

    #[test]
    fn merge_attribute_name_comparison_is_case_insensitive() {
        let existing: ExistingAttrs =
            [("MEMBERUID".to_string(), vec!["alice".to_string()])].into_iter().collect();
        let plan = plan_write(
            &content(&[("memberuid", AttrValue::texts(["bob"]))]),
            Some(&existing),
            &merge_attrs(),
        );
        assert_eq!(
            plan,
            WritePlan::Modify(vec![(
                "memberuid".to_string(),
                vec!["alice".to_string(), "bob".to_string()]
            )])
        );
    }

    #[test]
    fn sequence_by_construction_merges_even_outside_merge_set() {
        let existing: ExistingAttrs =
            [("mail".to_string(), vec!["a@x".to_string()])].into_iter().collect();
        let plan = plan_write(
            &content(&[("mail", AttrValue::texts(["b@x"]))]),
            Some(&existing),
            &merge_attrs(),
        );
        assert_eq!(
            plan,
            WritePlan::Modify(vec![(
                "mail".to_string(),
                vec!["a@x".to_string(), "b@x".to_string()]
            )])
        );
    }

    #[test]
    fn scalar_attributes_replace_verbatim() {
        let existing: ExistingAttrs =
            [("cn".to_string(), vec!["Old".to_string()])].into_iter().collect();
        let plan = plan_write(
            &content(&[("cn", AttrValue::text("New"))]),
            Some(&existing),
            &merge_attrs(),
        );
        assert_eq!(
            plan,
            WritePlan::Modify(vec![("cn".to_string(), vec!["New".to_string()])])
        );
    }
}
