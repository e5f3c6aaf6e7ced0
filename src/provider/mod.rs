//! # Providers
//!
//! Per-provider configuration validation and credential assembly.
//!
//! Each provider module turns a raw [`ConfigSnapshot`] into a typed config
//! (collecting every violation) and merges it with a [`ResolvedSecret`] into
//! the canonical [`CredentialPayload`] published to consumers. Assembly is a
//! pure function: same inputs, same payload.
//!
//! Merge policy: configuration fields are written first, resolved secret
//! fields last, so credential material is never overridden by plaintext
//! configuration on a key collision.

pub mod azure;
pub mod gcs;
pub mod s3;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigSnapshot, ValidationErrors};
use crate::constants::MASKED_FIELDS;
use crate::secrets::{join_quoted, ResolvedSecret, SecretError, SecretRef};

/// Which object-storage backend this integrator fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    S3,
    Azure,
    Gcs,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::S3 => "s3",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcs => "gcs",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "s3" => Ok(ProviderKind::S3),
            "azure" => Ok(ProviderKind::Azure),
            "gcs" => Ok(ProviderKind::Gcs),
            other => Err(format!(
                "unknown provider '{other}' (expected one of: s3, azure, gcs)"
            )),
        }
    }
}

/// The canonical merged payload written into each consumer's data bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CredentialPayload {
    fields: BTreeMap<String, String>,
}

impl CredentialPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Insert only when the value is present and non-empty.
    pub fn insert_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            if !value.is_empty() {
                self.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The listed fields that are absent or empty, sorted.
    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        let mut missing: Vec<String> = required
            .iter()
            .filter(|key| self.get(key).is_none_or(str::is_empty))
            .map(|key| (*key).to_string())
            .collect();
        missing.sort_unstable();
        missing
    }

    /// Copy with credential-bearing values replaced by `**********`.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(k, v)| {
                if MASKED_FIELDS.contains(&k.as_str()) {
                    (k.clone(), "**********".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

/// Credential assembly failures.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("incomplete credentials; missing field(s): {}", join_quoted(.fields))]
    Incomplete { fields: Vec<String> },

    #[error("ambiguous credentials: the secret sets both 'secret-key' and 'client-secret'")]
    AmbiguousCredentials,
}

/// A provider config that passed validation, ready for assembly.
#[derive(Debug, Clone)]
pub enum ValidatedConfig {
    S3(s3::S3Config),
    Azure(azure::AzureConfig),
    Gcs(gcs::GcsConfig),
}

impl ValidatedConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ValidatedConfig::S3(_) => ProviderKind::S3,
            ValidatedConfig::Azure(_) => ProviderKind::Azure,
            ValidatedConfig::Gcs(_) => ProviderKind::Gcs,
        }
    }

    /// The secret reference the operator pointed this integrator at.
    pub fn credentials(&self) -> &SecretRef {
        match self {
            ValidatedConfig::S3(config) => &config.credentials,
            ValidatedConfig::Azure(config) => &config.credentials,
            ValidatedConfig::Gcs(config) => &config.credentials,
        }
    }

    /// Merge the validated config with the resolved secret into the payload.
    pub fn assemble(&self, secret: &ResolvedSecret) -> Result<CredentialPayload, AssembleError> {
        match self {
            ValidatedConfig::S3(config) => config.assemble(secret),
            ValidatedConfig::Azure(config) => config.assemble(secret),
            ValidatedConfig::Gcs(config) => config.assemble(secret),
        }
    }
}

/// Validate a raw snapshot for the given provider.
pub fn validate(
    kind: ProviderKind,
    snapshot: &ConfigSnapshot,
) -> Result<ValidatedConfig, ValidationErrors> {
    match kind {
        ProviderKind::S3 => s3::S3Config::validate(snapshot).map(ValidatedConfig::S3),
        ProviderKind::Azure => azure::AzureConfig::validate(snapshot).map(ValidatedConfig::Azure),
        ProviderKind::Gcs => gcs::GcsConfig::validate(snapshot).map(ValidatedConfig::Gcs),
    }
}

/// Merge every secret field not named in `exclude` into `payload`,
/// overwriting any colliding configuration field.
pub(crate) fn merge_secret_fields(
    payload: &mut CredentialPayload,
    secret: &ResolvedSecret,
    exclude: &[&str],
) {
    for (key, value) in secret.iter() {
        if !exclude.contains(&key) && !value.is_empty() {
            payload.insert(key, value);
        }
    }
}

/// Check `payload` for the provider's required fields.
pub(crate) fn ensure_required(
    payload: &CredentialPayload,
    required: &[&str],
) -> Result<(), AssembleError> {
    let missing = payload.missing_fields(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AssembleError::Incomplete { fields: missing })
    }
}
