//! # Azure Storage Provider
//!
//! Validation and credential assembly for Azure Blob / Data Lake storage.
//!
//! Azure carries three authentication shapes: a storage-account key
//! (`secret-key` in the secret), a service principal (`client-secret` in the
//! secret plus `client-id`/`tenant-id`/`subscription-id` options), or a
//! self-contained `connection-string`. The account key and the service
//! principal are mutually exclusive; the consumer-facing field is
//! `secret-key` in both cases.

use crate::config::{optional, ConfigSnapshot, ValidationErrors, Violations};
use crate::constants::{AZURE_CREDENTIAL_FIELDS, AZURE_REQUIRED_FIELDS};
use crate::secrets::{ResolvedSecret, SecretError, SecretRef};

use super::{ensure_required, merge_secret_fields, AssembleError, CredentialPayload};

const PROTOCOLS: &[&str] = &["wasb", "wasbs", "abfs", "abfss", "https"];

/// Validated Azure Storage configuration.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub container: String,
    pub storage_account: String,
    pub connection_protocol: String,
    pub endpoint: Option<String>,
    pub resource_group: Option<String>,
    pub path: Option<String>,
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub credentials: SecretRef,
}

impl AzureConfig {
    /// Validate a raw snapshot, collecting every violation.
    pub fn validate(snapshot: &ConfigSnapshot) -> Result<Self, ValidationErrors> {
        let mut violations = Violations::new();

        let container = optional(snapshot, "container").map(str::to_string);
        if container.is_none() {
            violations.missing("container");
        }

        let storage_account = optional(snapshot, "storage-account").map(str::to_string);
        if storage_account.is_none() {
            violations.missing("storage-account");
        }

        let connection_protocol = optional(snapshot, "connection-protocol")
            .map(str::to_lowercase);
        match connection_protocol {
            None => violations.missing("connection-protocol"),
            Some(ref protocol) if !PROTOCOLS.contains(&protocol.as_str()) => {
                violations.invalid(
                    "connection-protocol",
                    "allowed values: 'wasb', 'wasbs', 'abfs', 'abfss', 'https'",
                );
            }
            Some(_) => {}
        }

        let credentials = match optional(snapshot, "credentials") {
            Some(uri) => match SecretRef::parse(uri) {
                Ok(reference) => Some(reference),
                Err(err) => {
                    violations.invalid("credentials", err.to_string());
                    None
                }
            },
            None => {
                violations.missing("credentials");
                None
            }
        };

        match (container, storage_account, connection_protocol, credentials) {
            (Some(container), Some(storage_account), Some(connection_protocol), Some(credentials)) => {
                violations.finish(Self {
                    container,
                    storage_account,
                    connection_protocol,
                    endpoint: optional(snapshot, "endpoint").map(str::to_string),
                    resource_group: optional(snapshot, "resource-group").map(str::to_string),
                    path: optional(snapshot, "path").map(str::to_string),
                    client_id: optional(snapshot, "client-id").map(str::to_string),
                    tenant_id: optional(snapshot, "tenant-id").map(str::to_string),
                    subscription_id: optional(snapshot, "subscription-id").map(str::to_string),
                    credentials,
                })
            }
            // A mandatory option is missing, so finish() is guaranteed to err.
            _ => Err(violations
                .finish(())
                .expect_err("a mandatory-option violation was recorded")),
        }
    }

    /// The endpoint constructed from the other parameters when the operator
    /// has not set one explicitly.
    pub fn derived_endpoint(&self) -> Option<String> {
        if let Some(ref endpoint) = self.endpoint {
            return Some(endpoint.clone());
        }
        match self.connection_protocol.as_str() {
            "wasb" | "wasbs" => Some(format!(
                "{}://{}@{}.blob.core.windows.net/",
                self.connection_protocol, self.container, self.storage_account
            )),
            "abfs" | "abfss" => Some(format!(
                "{}://{}@{}.dfs.core.windows.net/",
                self.connection_protocol, self.container, self.storage_account
            )),
            _ => None,
        }
    }

    /// Assemble the relation payload from this config and the resolved secret.
    pub fn assemble(&self, secret: &ResolvedSecret) -> Result<CredentialPayload, AssembleError> {
        let secret_key = secret.get("secret-key");
        let client_secret = secret.get("client-secret");
        let connection_string = secret.get("connection-string");

        if secret_key.is_some() && client_secret.is_some() {
            return Err(AssembleError::AmbiguousCredentials);
        }
        if secret_key.is_none() && client_secret.is_none() && connection_string.is_none() {
            return Err(SecretError::MissingFields {
                id: self.credentials.to_string(),
                fields: AZURE_CREDENTIAL_FIELDS
                    .iter()
                    .map(|f| (*f).to_string())
                    .collect(),
            }
            .into());
        }

        let mut payload = CredentialPayload::new();
        payload.insert("container", self.container.as_str());
        payload.insert("storage-account", self.storage_account.as_str());
        payload.insert("connection-protocol", self.connection_protocol.as_str());
        payload.insert_opt("endpoint", self.derived_endpoint().as_deref());
        payload.insert_opt("path", self.path.as_deref());
        payload.insert_opt("resource-group", self.resource_group.as_deref());

        if let Some(key) = secret_key.or(client_secret) {
            payload.insert("secret-key", key);
        }
        if client_secret.is_some() {
            // Service-principal mode needs the principal's identity alongside
            // its secret.
            let mut missing: Vec<String> = Vec::new();
            for (option, value) in [
                ("client-id", &self.client_id),
                ("tenant-id", &self.tenant_id),
                ("subscription-id", &self.subscription_id),
            ] {
                match value {
                    Some(value) => payload.insert(option, value.as_str()),
                    None => missing.push(option.to_string()),
                }
            }
            if !missing.is_empty() {
                return Err(AssembleError::Incomplete { fields: missing });
            }
        }
        payload.insert_opt("connection-string", connection_string);

        merge_secret_fields(
            &mut payload,
            secret,
            &["secret-key", "client-secret", "connection-string"],
        );
        ensure_required(&payload, AZURE_REQUIRED_FIELDS)?;
        Ok(payload)
    }
}
