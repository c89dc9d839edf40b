//! Well-known collection names.
//!
//! Each collection maps to one redb table with `&str` keys and `&[u8]`
//! values. Per-deployment secret collections are named
//! `{deployment}-secrets` (lower-cased) and are not listed here.

use redb::TableDefinition;

/// Deployment configurations keyed by deployment name.
pub const DEPLOYMENTS: &str = "deployments";

/// Suffix appended to a deployment name to form its secrets collection.
pub const SECRETS_SUFFIX: &str = "secrets";

/// Collections created when the store is opened.
pub const BUILTIN: &[&str] = &[DEPLOYMENTS];

/// Build the redb table definition for a collection name.
pub(crate) fn table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}
