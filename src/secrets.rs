//! # Secrets
//!
//! Secret references, resolved secret content, and the [`SecretStore`] seam
//! to the external secrets backend.
//!
//! Resolution is read-only and happens once per dispatch cycle; content is
//! never cached so that rotation and revocation take effect on the very next
//! cycle. Resolved values are wiped from memory on drop.

use std::collections::BTreeMap;
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use zeroize::Zeroizing;

/// Secret URIs look like `secret:0123456789abcdefghij`.
static SECRET_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^secret:[a-z0-9]{20}$").expect("secret URI regex is statically known to compile")
});

/// Validated, opaque reference to externally stored key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid secret URI")]
pub struct InvalidSecretRef(String);

impl SecretRef {
    pub fn parse(uri: &str) -> Result<Self, InvalidSecretRef> {
        if SECRET_URI.is_match(uri) {
            Ok(Self(uri.to_string()))
        } else {
            Err(InvalidSecretRef(uri.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier part, without the `secret:` scheme.
    pub fn id(&self) -> &str {
        self.0
            .split_once(':')
            .map_or(self.0.as_str(), |(_, id)| id)
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed failures surfaced by secret resolution.
///
/// The messages double as the operator-facing Blocked reasons.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("the secret '{0}' does not exist")]
    NotFound(String),

    #[error("permission for secret '{0}' has not been granted")]
    AccessDenied(String),

    #[error("the secret '{id}' is missing mandatory field(s): {}", join_quoted(.fields))]
    MissingFields { id: String, fields: Vec<String> },

    #[error("the secret '{id}' could not be decoded: {detail}")]
    Malformed { id: String, detail: String },
}

pub(crate) fn join_quoted(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("'{f}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Key/value content of a dereferenced secret.
///
/// Values are held in [`Zeroizing`] wrappers so plaintext credentials do not
/// linger in freed memory once the cycle is over.
#[derive(Default)]
pub struct ResolvedSecret {
    entries: BTreeMap<String, Zeroizing<String>>,
}

impl ResolvedSecret {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Zeroizing::new(v.into())))
                .collect(),
        }
    }

    /// Value for `key`, with the empty string treated as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.entries.get(key).map(|v| v.as_str()) {
            None | Some("") => None,
            Some(value) => Some(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The listed keys that are absent or empty in this secret.
    pub fn missing_keys(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| (*key).to_string())
            .collect()
    }
}

impl std::fmt::Debug for ResolvedSecret {
    // Keys only; never log credential material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Seam to the external secrets backend.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current content granted for `reference`. Read-only; no
    /// caching between calls.
    async fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError>;
}

/// In-memory secret store, used in tests and one-shot tooling.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    denied: Mutex<Vec<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K, V, I>(&self, uri: &str, content: I)
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.secrets.lock().expect("secret store lock poisoned").insert(
            uri.to_string(),
            content
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
    }

    pub fn remove(&self, uri: &str) {
        self.secrets
            .lock()
            .expect("secret store lock poisoned")
            .remove(uri);
    }

    /// Mark a secret as present but not granted to this application.
    pub fn deny(&self, uri: &str) {
        self.denied
            .lock()
            .expect("secret store lock poisoned")
            .push(uri.to_string());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError> {
        if self
            .denied
            .lock()
            .expect("secret store lock poisoned")
            .iter()
            .any(|uri| uri == reference.as_str())
        {
            return Err(SecretError::AccessDenied(reference.to_string()));
        }
        let secrets = self.secrets.lock().expect("secret store lock poisoned");
        match secrets.get(reference.as_str()) {
            Some(content) => Ok(ResolvedSecret::from_pairs(
                content.iter().map(|(k, v)| (k.clone(), v.clone())),
            )),
            None => Err(SecretError::NotFound(reference.to_string())),
        }
    }
}
