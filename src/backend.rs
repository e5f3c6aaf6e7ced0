//! # File-backed model store
//!
//! Implementations of the configuration, secret and relation seams over plain
//! files, for running the integrator against a directory tree:
//!
//! - configuration: one YAML mapping of option name → scalar value
//! - secrets: one YAML mapping per secret, named `<id>.yaml` after the
//!   identifier part of the secret URI
//! - relations: one JSON record per connected consumer, named
//!   `relation-<id>.json`, holding the consumer's application name and its
//!   data bag
//!
//! Everything is re-read on every call; the files are the state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigSnapshot, ConfigSource};
use crate::relation::{DataBag, RelationBinding, RelationError, RelationStore};
use crate::secrets::{ResolvedSecret, SecretError, SecretRef, SecretStore};

/// Configuration snapshots read from a single YAML file.
///
/// A missing file is an empty snapshot: the operator has not configured
/// anything yet, which is a Waiting state, not an error.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<ConfigSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ConfigSnapshot::new()),
            Err(e) => {
                return Err(e).context(format!("failed to read {}", self.path.display()));
            }
        };

        let value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .context(format!("failed to parse {}", self.path.display()))?;
        snapshot_from_yaml(&value)
            .context(format!("unexpected structure in {}", self.path.display()))
    }
}

/// Flatten a YAML mapping of scalars into an option map. Options are scalar
/// strings/ints/bools by contract; anything nested is a configuration error.
fn snapshot_from_yaml(value: &serde_yaml::Value) -> Result<ConfigSnapshot> {
    let mut snapshot = ConfigSnapshot::new();
    let serde_yaml::Value::Mapping(mapping) = value else {
        anyhow::bail!("expected a mapping of option name to scalar value");
    };
    for (key, value) in mapping {
        let key = key
            .as_str()
            .context("option names must be strings")?
            .to_string();
        let value = match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => anyhow::bail!("option '{key}' must be a scalar"),
        };
        snapshot.insert(key, value);
    }
    Ok(snapshot)
}

/// Secrets resolved from one YAML file per secret id.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn secret_path(&self, reference: &SecretRef) -> PathBuf {
        self.dir.join(format!("{}.yaml", reference.id()))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError> {
        let path = self.secret_path(reference);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SecretError::NotFound(reference.to_string()));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(SecretError::AccessDenied(reference.to_string()));
            }
            Err(e) => {
                return Err(SecretError::Malformed {
                    id: reference.to_string(),
                    detail: e.to_string(),
                });
            }
        };

        let content: std::collections::BTreeMap<String, String> = serde_yaml::from_str(&raw)
            .map_err(|e| SecretError::Malformed {
                id: reference.to_string(),
                detail: e.to_string(),
            })?;
        Ok(ResolvedSecret::from_pairs(content))
    }
}

/// On-disk record for one connected consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationRecord {
    application: String,
    #[serde(default)]
    data: DataBag,
}

/// Relation bags stored as one JSON record per relation.
#[derive(Debug, Clone)]
pub struct FileRelationStore {
    dir: PathBuf,
}

impl FileRelationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("relation-{id}.json"))
    }

    async fn read_record(&self, id: u32) -> Result<RelationRecord, RelationError> {
        let path = self.record_path(id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RelationError::ReadFailure {
                id,
                detail: e.to_string(),
            })?;
        serde_json::from_str(&raw).map_err(|e| RelationError::ReadFailure {
            id,
            detail: e.to_string(),
        })
    }
}

fn relation_id_from_path(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("relation-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[async_trait]
impl RelationStore for FileRelationStore {
    async fn bindings(&self) -> Result<Vec<RelationBinding>, RelationError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // No relations directory means no consumers have joined yet.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelationError::Enumerate(e.to_string())),
        };

        let mut bindings = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| RelationError::Enumerate(e.to_string()))?;
            let Some(entry) = entry else { break };
            let Some(id) = relation_id_from_path(&entry.path()) else {
                continue;
            };
            let record = self.read_record(id).await?;
            bindings.push(RelationBinding {
                id,
                application: record.application,
            });
        }
        bindings.sort_by_key(|binding| binding.id);
        Ok(bindings)
    }

    async fn read_bag(&self, id: u32) -> Result<DataBag, RelationError> {
        Ok(self.read_record(id).await?.data)
    }

    async fn write_bag(&self, id: u32, bag: &DataBag) -> Result<(), RelationError> {
        let mut record = self.read_record(id).await?;
        record.data = bag.clone();
        let serialized =
            serde_json::to_string_pretty(&record).map_err(|e| RelationError::WriteFailure {
                id,
                detail: e.to_string(),
            })?;
        tokio::fs::write(self.record_path(id), serialized)
            .await
            .map_err(|e| RelationError::WriteFailure {
                id,
                detail: e.to_string(),
            })
    }
}
