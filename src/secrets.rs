use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use log::debug;
use serde_json::Value;
use thiserror::Error;
use zeroize::Zeroizing;

/// Scheme prefix marking an indirect secret inside plugin configuration.
pub const VAULT_SCHEME: &str = "vault://";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret storage error: {0}")]
    Store(String),
    #[error("invalid secret reference: {0}")]
    InvalidReference(String),
}

/// A parsed `vault://store/key` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    pub store: String,
    pub key: String,
}

impl SecretReference {
    /// Returns `Some` when the string uses the vault scheme, without
    /// validating the remainder.
    pub fn detect(raw: &str) -> Option<Result<Self, SecretError>> {
        raw.starts_with(VAULT_SCHEME).then(|| raw.parse())
    }
}

impl FromStr for SecretReference {
    type Err = SecretError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let rest = raw
            .strip_prefix(VAULT_SCHEME)
            .ok_or_else(|| SecretError::InvalidReference(format!("expected {VAULT_SCHEME}")))?;
        let (store, key) = rest
            .split_once('/')
            .ok_or_else(|| SecretError::InvalidReference(format!("missing key segment in {raw}")))?;
        if store.is_empty() || key.is_empty() {
            return Err(SecretError::InvalidReference(format!(
                "empty store or key segment in {raw}"
            )));
        }
        Ok(Self {
            store: store.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{VAULT_SCHEME}{}/{}", self.store, self.key)
    }
}

/// Resolves secret references against a backing store.
/// Backends (OS keychains, encrypted files, remote vaults) live outside this
/// crate.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &SecretReference) -> Result<Zeroizing<Vec<u8>>, SecretError>;
}

/// Replaces every `vault://store/key` string leaf in a plugin configuration
/// with the resolved secret before any plugin method runs. Non-UTF-8 secrets
/// are rejected since they cannot be represented in JSON.
pub fn materialize_config(
    config: &mut Value,
    resolver: &dyn SecretResolver,
) -> Result<(), SecretError> {
    match config {
        Value::String(s) => {
            if let Some(parsed) = SecretReference::detect(s) {
                let reference = parsed?;
                debug!("[secrets] resolving {} for plugin configuration", reference);
                let bytes = resolver.resolve(&reference)?;
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    SecretError::Store(format!("secret {reference} is not valid UTF-8"))
                })?;
                *s = text;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                materialize_config(item, resolver)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                materialize_config(item, resolver)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Simple in-memory resolver for tests and embedded use.
#[derive(Default)]
pub struct InMemorySecretResolver {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemorySecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, store: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((store.to_string(), key.to_string()), value.into());
    }
}

impl SecretResolver for InMemorySecretResolver {
    fn resolve(&self, reference: &SecretReference) -> Result<Zeroizing<Vec<u8>>, SecretError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(reference.store.clone(), reference.key.clone()))
            .cloned()
            .map(Zeroizing::new)
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))
    }
}
