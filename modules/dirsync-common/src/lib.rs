pub mod config;
pub mod error;
pub mod template;
pub mod types;

pub use config::{Config, DatabaseConfig, HookRetryConfig, LdapEndpoint, DEFAULT_CONFIG_PATH};
pub use error::SyncError;
pub use types::{
    normalize_dn, AttrValue, EntryContent, HookResponse, ScalarValue, SearchSpec, SourceEntry,
    TransformedEntry,
};
