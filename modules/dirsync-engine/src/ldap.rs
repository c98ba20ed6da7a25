//! LDAP client plumbing shared by the source poller and the target writer.
//!
//! Connections are deliberately short-lived: every poll and every target
//! write opens, binds, works, and unbinds.

use std::collections::HashMap;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, Scope, SearchEntry};

use dirsync_common::{
    AttrValue, EntryContent, LdapEndpoint, ScalarValue, SourceEntry, SyncError,
};

pub(crate) fn ldap_err(e: ldap3::LdapError) -> SyncError {
    SyncError::Ldap(e.to_string())
}

/// Open a fresh connection and simple-bind with the endpoint credentials.
pub async fn connect(endpoint: &LdapEndpoint) -> Result<Ldap, SyncError> {
    let (conn, mut ldap) = LdapConnAsync::new(&endpoint.url).await.map_err(ldap_err)?;
    ldap3::drive!(conn);
    ldap.simple_bind(&endpoint.bind_dn, &endpoint.bind_password)
        .await
        .map_err(ldap_err)?
        .success()
        .map_err(ldap_err)?;
    Ok(ldap)
}

/// Map a search entry onto the engine's content model: single-valued
/// attributes become scalars, multi-valued attributes keep server order.
pub fn to_source_entry(entry: SearchEntry) -> SourceEntry {
    let mut content = EntryContent::new();
    for (name, mut values) in entry.attrs {
        let value = if values.len() == 1 {
            AttrValue::Scalar(ScalarValue::Text(values.remove(0)))
        } else {
            AttrValue::List(values.into_iter().map(ScalarValue::Text).collect())
        };
        content.insert(name, value);
    }
    SourceEntry {
        dn: entry.dn,
        content,
    }
}

/// Read access to the source directory, one subtree search per poll.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn search(&self, base_dn: &str, filter: &str)
        -> Result<Vec<SourceEntry>, SyncError>;
}

pub struct LdapSourceClient {
    endpoint: LdapEndpoint,
}

impl LdapSourceClient {
    pub fn new(endpoint: LdapEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl SourceClient for LdapSourceClient {
    async fn search(
        &self,
        base_dn: &str,
        filter: &str,
    ) -> Result<Vec<SourceEntry>, SyncError> {
        let mut ldap = connect(&self.endpoint).await?;
        let outcome = ldap
            .search(base_dn, Scope::Subtree, filter, vec!["*"])
            .await
            .map(|result| result.success());
        let _ = ldap.unbind().await;
        let (entries, _) = outcome.map_err(ldap_err)?.map_err(ldap_err)?;
        Ok(entries
            .into_iter()
            .map(|e| to_source_entry(SearchEntry::construct(e)))
            .collect())
    }
}

/// Existing target attributes from a pre-write read, keyed as the server
/// returned them.
pub type ExistingAttrs = HashMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_valued_attributes_become_scalars() {
        let entry = SearchEntry {
            dn: "uid=a,dc=x".into(),
            attrs: HashMap::from([
                ("cn".to_string(), vec!["Alice".to_string()]),
                (
                    "memberUid".to_string(),
                    vec!["a".to_string(), "b".to_string()],
                ),
            ]),
            bin_attrs: HashMap::new(),
        };
        let source = to_source_entry(entry);
        assert_eq!(source.content.get("cn"), Some(&AttrValue::text("Alice")));
        assert_eq!(
            source.content.get("memberUid"),
            Some(&AttrValue::texts(["a", "b"]))
        );
    }
}
