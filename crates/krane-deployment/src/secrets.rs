//! Per-deployment secrets.
//!
//! Every deployment owns an isolated `{deployment}-secrets` collection. A
//! secret is stored in plaintext under its key and carries a derived alias
//! (`api-token` → `@API_TOKEN`) that deployment configs use to reference it
//! when injecting environment variables into containers.
//!
//! Redaction happens on read: [`SecretsStore::get_all_redacted`] returns
//! masked copies while the stored values stay untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use krane_state::StateStore;
use krane_state::collections::SECRETS_SUFFIX;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DeploymentError, DeploymentResult};

/// Value shown in place of a secret's plaintext.
pub const REDACTED: &str = "<redacted>";

const MIN_KEY_LEN: usize = 2;
const MAX_KEY_LEN: usize = 50;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*[a-zA-Z0-9]$").expect("valid secret key pattern")
});

/// A single deployment secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Owning deployment name.
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub alias: String,
}

impl Secret {
    fn new(namespace: &str, key: &str, value: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            alias: format_secret_alias(key),
        }
    }

    /// A display-safe copy with the value masked.
    pub fn redacted(&self) -> Self {
        Self {
            value: REDACTED.to_string(),
            ..self.clone()
        }
    }

    /// Whether `reference` points at this secret, by alias or raw key.
    pub fn matches_reference(&self, reference: &str) -> bool {
        reference == self.alias || reference == self.key
    }
}

/// Check a secret key: 2–50 characters of `[a-zA-Z0-9_-]`, starting and
/// ending with an alphanumeric.
pub fn is_valid_secret_key(key: &str) -> bool {
    (MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len()) && KEY_PATTERN.is_match(key)
}

/// Derive the reference alias for a key: upper-cased, `-` → `_`, `@` prefix.
pub fn format_secret_alias(key: &str) -> String {
    format!("@{}", key.to_uppercase().replace('-', "_"))
}

/// Name of the secrets collection owned by a deployment.
pub fn collection_name(namespace: &str) -> String {
    format!("{namespace}-{SECRETS_SUFFIX}").to_lowercase()
}

/// Stores secrets in per-deployment collections.
#[derive(Clone)]
pub struct SecretsStore {
    store: StateStore,
}

impl SecretsStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Provision the secrets collection for a newly registered deployment.
    pub fn create_collection(&self, namespace: &str) -> DeploymentResult<()> {
        let collection = collection_name(namespace);
        self.store.create_collection(&collection)?;
        info!(%namespace, %collection, "secrets collection created");
        Ok(())
    }

    /// Destroy a deployment's secrets collection and every secret in it.
    pub fn delete_collection(&self, namespace: &str) -> DeploymentResult<()> {
        let collection = collection_name(namespace);
        let existed = self.store.delete_collection(&collection)?;
        info!(%namespace, %collection, existed, "secrets collection deleted");
        Ok(())
    }

    /// Insert or update a secret. The returned record carries the alias
    /// to report back to the user.
    pub fn add(&self, namespace: &str, key: &str, value: &str) -> DeploymentResult<Secret> {
        if !is_valid_secret_key(key) {
            return Err(DeploymentError::InvalidSecretKey(key.to_string()));
        }
        // A stored mask would read back unchanged through redaction.
        if value == REDACTED {
            return Err(DeploymentError::Validation(format!(
                "secret {key} cannot hold the redaction mask"
            )));
        }

        let secret = Secret::new(namespace, key, value);
        if let Some(existing) = self
            .get_all(namespace)?
            .into_iter()
            .find(|s| s.alias == secret.alias && s.key != secret.key)
        {
            return Err(DeploymentError::Conflict {
                alias: secret.alias,
                existing: existing.key,
            });
        }

        self.store
            .put_json(&collection_name(namespace), &secret.key, &secret)?;
        debug!(%namespace, key, alias = %secret.alias, "secret stored");
        Ok(secret)
    }

    /// Get a secret in plaintext.
    pub fn get(&self, namespace: &str, key: &str) -> DeploymentResult<Secret> {
        self.store
            .get_json(&collection_name(namespace), key)?
            .ok_or_else(|| DeploymentError::SecretNotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    /// Get every secret of a deployment in plaintext, ordered by key.
    pub fn get_all(&self, namespace: &str) -> DeploymentResult<Vec<Secret>> {
        self.store
            .get_all(&collection_name(namespace))?
            .iter()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| {
                    DeploymentError::State(krane_state::StateError::Deserialize(e.to_string()))
                })
            })
            .collect()
    }

    /// Get every secret of a deployment with values masked.
    pub fn get_all_redacted(&self, namespace: &str) -> DeploymentResult<Vec<Secret>> {
        Ok(self
            .get_all(namespace)?
            .iter()
            .map(Secret::redacted)
            .collect())
    }

    /// Remove one secret. Removing a missing secret is not an error.
    pub fn delete(&self, namespace: &str, key: &str) -> DeploymentResult<()> {
        let existed = self.store.remove(&collection_name(namespace), key)?;
        debug!(%namespace, key, existed, "secret deleted");
        Ok(())
    }

    /// Resolve a config's `env name → secret reference` map into
    /// `NAME=value` pairs, ordered by env name.
    ///
    /// Fails with `Validation` if any reference matches no stored secret.
    pub fn resolve_env(
        &self,
        namespace: &str,
        references: &BTreeMap<String, String>,
    ) -> DeploymentResult<Vec<String>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let secrets = self.get_all(namespace)?;
        references
            .iter()
            .map(|(env_name, reference)| {
                secrets
                    .iter()
                    .find(|s| s.matches_reference(reference))
                    .map(|s| format!("{env_name}={}", s.value))
                    .ok_or_else(|| {
                        DeploymentError::Validation(format!(
                            "{env_name} references unknown secret {reference}"
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> SecretsStore {
        let store = SecretsStore::new(StateStore::open_in_memory().unwrap());
        store.create_collection("api").unwrap();
        store
    }

    // ── Key validation & aliases ───────────────────────────────────

    #[test]
    fn valid_secret_keys() {
        for key in ["ab", "api-token", "API_TOKEN", "a1", "x_y-z9", "k".repeat(50).as_str()] {
            assert!(is_valid_secret_key(key), "{key} should be valid");
        }
    }

    #[test]
    fn invalid_secret_keys() {
        for key in [
            "a",
            "",
            "api token",
            "-token",
            "token-",
            "_token",
            "token_",
            "tok.en",
            "k".repeat(51).as_str(),
        ] {
            assert!(!is_valid_secret_key(key), "{key} should be invalid");
        }
    }

    #[test]
    fn alias_format() {
        assert_eq!(format_secret_alias("api-token"), "@API_TOKEN");
        assert_eq!(format_secret_alias("db_pass"), "@DB_PASS");
        assert_eq!(format_secret_alias("api-token"), format_secret_alias("api-token"));
    }

    #[test]
    fn collection_name_is_lowercased() {
        assert_eq!(collection_name("My-App"), "my-app-secrets");
    }

    // ── Store operations ───────────────────────────────────────────

    #[test]
    fn add_returns_alias_and_get_returns_plaintext() {
        let store = secrets();
        let secret = store.add("api", "api-token", "s3cret").unwrap();
        assert_eq!(secret.alias, "@API_TOKEN");
        assert_eq!(secret.namespace, "api");

        let loaded = store.get("api", "api-token").unwrap();
        assert_eq!(loaded.value, "s3cret");
    }

    #[test]
    fn add_rejects_invalid_key() {
        let store = secrets();
        assert!(matches!(
            store.add("api", "a", "v"),
            Err(DeploymentError::InvalidSecretKey(_))
        ));
        assert!(store.get_all("api").unwrap().is_empty());
    }

    #[test]
    fn add_upserts_same_key() {
        let store = secrets();
        store.add("api", "token", "v1").unwrap();
        store.add("api", "token", "v2").unwrap();
        let all = store.get_all("api").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, "v2");
    }

    #[test]
    fn add_rejects_alias_collision() {
        let store = secrets();
        store.add("api", "api-token", "v1").unwrap();
        let err = store.add("api", "API_TOKEN", "v2").unwrap_err();
        assert!(matches!(
            err,
            DeploymentError::Conflict { ref alias, ref existing }
                if alias == "@API_TOKEN" && existing == "api-token"
        ));
    }

    #[test]
    fn add_without_collection_fails() {
        let store = SecretsStore::new(StateStore::open_in_memory().unwrap());
        assert!(matches!(
            store.add("ghost", "token", "v"),
            Err(DeploymentError::State(krane_state::StateError::CollectionNotFound(_)))
        ));
    }

    #[test]
    fn get_missing_secret_is_not_found() {
        let store = secrets();
        assert!(matches!(
            store.get("api", "nope"),
            Err(DeploymentError::SecretNotFound { .. })
        ));
    }

    #[test]
    fn redacted_values_never_leak() {
        let store = secrets();
        store.add("api", "token", "s3cret").unwrap();
        store.add("api", "empty", "").unwrap();

        let plain = store.get_all("api").unwrap();
        let redacted = store.get_all_redacted("api").unwrap();
        assert_eq!(plain.len(), redacted.len());
        for (p, r) in plain.iter().zip(&redacted) {
            assert_eq!(r.key, p.key);
            assert_eq!(r.alias, p.alias);
            assert_eq!(r.value, REDACTED);
            if !p.value.is_empty() {
                assert_ne!(r.value, p.value);
            }
        }

        // Stored values are untouched.
        assert_eq!(store.get("api", "token").unwrap().value, "s3cret");
    }

    #[test]
    fn add_rejects_the_redaction_mask_as_value() {
        let store = secrets();
        assert!(matches!(
            store.add("api", "password", REDACTED),
            Err(DeploymentError::Validation(_))
        ));
        assert!(store.get_all("api").unwrap().is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = secrets();
        store.add("api", "token", "v").unwrap();
        store.delete("api", "token").unwrap();
        store.delete("api", "token").unwrap();
        assert!(store.get_all("api").unwrap().is_empty());
    }

    #[test]
    fn collections_are_isolated() {
        let store = secrets();
        store.create_collection("web").unwrap();
        store.add("api", "token", "api-value").unwrap();
        store.add("web", "token", "web-value").unwrap();

        assert_eq!(store.get("api", "token").unwrap().value, "api-value");
        assert_eq!(store.get("web", "token").unwrap().value, "web-value");

        store.delete_collection("web").unwrap();
        assert_eq!(store.get("api", "token").unwrap().value, "api-value");
        assert!(store.get_all("web").is_err());
    }

    // ── Env resolution ─────────────────────────────────────────────

    #[test]
    fn resolve_env_by_alias_and_key() {
        let store = secrets();
        store.add("api", "api-token", "t0ken").unwrap();
        store.add("api", "db-pass", "hunter2").unwrap();

        let refs = BTreeMap::from([
            ("TOKEN".to_string(), "@API_TOKEN".to_string()),
            ("DB_PASSWORD".to_string(), "db-pass".to_string()),
        ]);
        let env = store.resolve_env("api", &refs).unwrap();
        assert_eq!(env, vec!["DB_PASSWORD=hunter2", "TOKEN=t0ken"]);
    }

    #[test]
    fn resolve_env_rejects_unknown_reference() {
        let store = secrets();
        let refs = BTreeMap::from([("TOKEN".to_string(), "@MISSING".to_string())]);
        assert!(matches!(
            store.resolve_env("api", &refs),
            Err(DeploymentError::Validation(_))
        ));
    }

    #[test]
    fn resolve_env_with_no_references_skips_store() {
        let store = SecretsStore::new(StateStore::open_in_memory().unwrap());
        // No collection exists, but nothing needs resolving.
        assert!(store.resolve_env("ghost", &BTreeMap::new()).unwrap().is_empty());
    }
}
