//! # GCS Provider
//!
//! Validation and credential assembly for Google Cloud Storage.
//!
//! The credential is a service-account key blob carried under the
//! `service-account-json` key of the secret and republished to consumers as
//! `sa-key`.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{optional, ConfigSnapshot, ValidationErrors, Violations};
use crate::constants::GCS_REQUIRED_FIELDS;
use crate::secrets::{ResolvedSecret, SecretError, SecretRef};

use super::{ensure_required, merge_secret_fields, AssembleError, CredentialPayload};

/// 3-63 chars, lowercase letters/digits/hyphens, alphanumeric at both ends.
static BUCKET_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9](?:[a-z0-9-]{1,61})[a-z0-9]$")
        .expect("bucket regex is statically known to compile")
});

static PATH_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._\-/ ]+$").expect("path regex is statically known to compile")
});

const STORAGE_CLASSES: &[&str] = &["STANDARD", "NEARLINE", "COLDLINE", "ARCHIVE"];
const MAX_PATH_BYTES: usize = 1024;

fn path_violation(path: &str) -> Option<&'static str> {
    if path.contains('\u{0}') {
        return Some("must not contain NUL bytes");
    }
    if path.len() > MAX_PATH_BYTES {
        return Some("must be at most 1024 bytes of UTF-8");
    }
    if path.starts_with('/') {
        return Some("must not start with '/'");
    }
    if !PATH_CHARSET.is_match(path) {
        return Some("contains unsupported characters (allowed: letters, digits, . _ - / space)");
    }
    None
}

/// Validated GCS configuration.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    pub storage_class: Option<String>,
    pub path: Option<String>,
    pub credentials: SecretRef,
}

impl GcsConfig {
    /// Validate a raw snapshot, collecting every violation.
    pub fn validate(snapshot: &ConfigSnapshot) -> Result<Self, ValidationErrors> {
        let mut violations = Violations::new();

        let bucket = optional(snapshot, "bucket").map(str::to_string);
        match bucket {
            None => violations.missing("bucket"),
            Some(ref name) if !BUCKET_SYNTAX.is_match(name) => {
                violations.invalid(
                    "bucket",
                    "must be 3-63 characters of lowercase letters, digits or hyphens, \
                     starting and ending with a letter or digit",
                );
            }
            Some(_) => {}
        }

        let storage_class = optional(snapshot, "storage-class").map(str::to_string);
        if let Some(ref class) = storage_class {
            if !STORAGE_CLASSES.contains(&class.as_str()) {
                violations.invalid(
                    "storage-class",
                    "allowed values: 'STANDARD', 'NEARLINE', 'COLDLINE', 'ARCHIVE'",
                );
            }
        }

        let path = optional(snapshot, "path").map(str::to_string);
        if let Some(ref path) = path {
            if let Some(reason) = path_violation(path) {
                violations.invalid("path", reason);
            }
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

        match (bucket, credentials) {
            (Some(bucket), Some(credentials)) => violations.finish(Self {
                bucket,
                storage_class,
                path,
                credentials,
            }),
            // A mandatory option is missing, so finish() is guaranteed to err.
            _ => Err(violations
                .finish(())
                .expect_err("a mandatory-option violation was recorded")),
        }
    }

    /// Assemble the relation payload from this config and the resolved secret.
    pub fn assemble(&self, secret: &ResolvedSecret) -> Result<CredentialPayload, AssembleError> {
        let Some(sa_key) = secret.get("service-account-json") else {
            return Err(SecretError::MissingFields {
                id: self.credentials.to_string(),
                fields: vec!["service-account-json".to_string()],
            }
            .into());
        };

        let mut payload = CredentialPayload::new();
        payload.insert("bucket", self.bucket.as_str());
        payload.insert("sa-key", sa_key);
        payload.insert_opt("storage-class", self.storage_class.as_deref());
        payload.insert_opt("path", self.path.as_deref());

        merge_secret_fields(&mut payload, secret, &["service-account-json"]);
        ensure_required(&payload, GCS_REQUIRED_FIELDS)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "secret:0123456789abcdefghij";
    const SA_JSON: &str = r#"{"type":"service_account","project_id":"p"}"#;

    fn snapshot(pairs: &[(&str, &str)]) -> ConfigSnapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_valid_config() {
        let config =
            GcsConfig::validate(&snapshot(&[("bucket", "my-bucket"), ("credentials", URI)]))
                .unwrap();
        assert_eq!(config.bucket, "my-bucket");
    }

    #[test]
    fn test_mandatory_options_reported() {
        let errors = GcsConfig::validate(&snapshot(&[])).unwrap_err();
        assert_eq!(errors.missing_fields(), vec!["bucket", "credentials"]);
    }

    #[test]
    fn test_bucket_syntax() {
        for name in ["ab", "My-Bucket", "-bucket", "bucket-"] {
            let errors =
                GcsConfig::validate(&snapshot(&[("bucket", name), ("credentials", URI)]))
                    .unwrap_err();
            assert_eq!(errors.invalid_fields(), vec!["bucket"], "{name}");
        }
    }

    #[test]
    fn test_storage_class_membership() {
        for class in STORAGE_CLASSES {
            let config = GcsConfig::validate(&snapshot(&[
                ("bucket", "my-bucket"),
                ("credentials", URI),
                ("storage-class", class),
            ]))
            .unwrap();
            assert_eq!(config.storage_class.as_deref(), Some(*class));
        }
        let errors = GcsConfig::validate(&snapshot(&[
            ("bucket", "my-bucket"),
            ("credentials", URI),
            ("storage-class", "GLACIER"),
        ]))
        .unwrap_err();
        assert_eq!(errors.invalid_fields(), vec!["storage-class"]);
    }

    #[test]
    fn test_path_rules() {
        for path in ["backups/daily", "a b/c.d-e_f"] {
            assert!(path_violation(path).is_none(), "{path}");
        }
        assert!(path_violation("/leading").is_some());
        assert!(path_violation("bad\u{0}byte").is_some());
        assert!(path_violation("emoji-🚀").is_some());
        assert!(path_violation(&"x".repeat(1025)).is_some());
    }

    #[test]
    fn test_assemble_maps_sa_key() {
        let config = GcsConfig::validate(&snapshot(&[
            ("bucket", "my-bucket"),
            ("credentials", URI),
            ("storage-class", "NEARLINE"),
        ]))
        .unwrap();
        let payload = config
            .assemble(&ResolvedSecret::from_pairs([(
                "service-account-json",
                SA_JSON,
            )]))
            .unwrap();
        assert_eq!(payload.get("bucket"), Some("my-bucket"));
        assert_eq!(payload.get("sa-key"), Some(SA_JSON));
        assert_eq!(payload.get("storage-class"), Some("NEARLINE"));
        assert_eq!(payload.get("service-account-json"), None);
    }

    #[test]
    fn test_assemble_requires_sa_key() {
        let config =
            GcsConfig::validate(&snapshot(&[("bucket", "my-bucket"), ("credentials", URI)]))
                .unwrap();
        let err = config.assemble(&ResolvedSecret::default()).unwrap_err();
        assert!(err.to_string().contains("service-account-json"));
    }
}
