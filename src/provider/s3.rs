//! # S3 Provider
//!
//! Validation and credential assembly for S3-compatible object storage.
//!
//! ## Validation Rules
//!
//! - `bucket` follows the general-purpose bucket naming rules: 3-63
//!   characters of lowercase letters, digits and hyphens, starting and ending
//!   alphanumeric, no `xn--` prefix, no `-s3alias` suffix
//! - `s3-api-version` is `"2"` or `"4"`
//! - `experimental-delete-older-than-days` is an integer in `[1, 9999999]`,
//!   republished to consumers as `delete-older-than-days`
//! - `tls-ca-chain` is a base64-encoded PEM bundle, republished as a
//!   JSON-encoded list of certificates

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{decode_ca_chain, optional, ConfigSnapshot, ValidationErrors, Violations};
use crate::constants::S3_REQUIRED_FIELDS;
use crate::secrets::{ResolvedSecret, SecretError, SecretRef};

use super::{ensure_required, merge_secret_fields, AssembleError, CredentialPayload};

/// Base syntax shared by all bucket names; the `xn--` / `-s3alias`
/// exclusions are checked separately because the regex crate has no
/// look-around.
static BUCKET_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$")
        .expect("bucket regex is statically known to compile")
});

const MAX_RETENTION_DAYS: i64 = 9_999_999;

fn valid_bucket_name(name: &str) -> bool {
    BUCKET_SYNTAX.is_match(name) && !name.starts_with("xn--") && !name.ends_with("-s3alias")
}

/// Validated S3 configuration.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub path: Option<String>,
    pub attributes: Option<String>,
    pub storage_class: Option<String>,
    /// JSON-encoded list of PEM certificates.
    pub tls_ca_chain: Option<String>,
    pub s3_api_version: Option<String>,
    pub s3_uri_style: Option<String>,
    pub delete_older_than_days: Option<u32>,
    pub credentials: SecretRef,
}

impl S3Config {
    /// Validate a raw snapshot, collecting every violation.
    pub fn validate(snapshot: &ConfigSnapshot) -> Result<Self, ValidationErrors> {
        let mut violations = Violations::new();

        let bucket = optional(snapshot, "bucket").map(str::to_string);
        if let Some(ref name) = bucket {
            if !valid_bucket_name(name) {
                violations.invalid("bucket", "does not follow the S3 bucket naming rules");
            }
        }

        let s3_api_version = optional(snapshot, "s3-api-version").map(str::to_string);
        if let Some(ref version) = s3_api_version {
            if version != "2" && version != "4" {
                violations.invalid("s3-api-version", "allowed values: '2', '4'");
            }
        }

        let tls_ca_chain = match optional(snapshot, "tls-ca-chain") {
            Some(encoded) => match decode_ca_chain(encoded) {
                Ok(chain) => Some(chain),
                Err(reason) => {
                    violations.invalid("tls-ca-chain", reason);
                    None
                }
            },
            None => None,
        };

        let delete_older_than_days = match optional(snapshot, "experimental-delete-older-than-days")
        {
            Some(raw) => match raw.parse::<i64>() {
                Ok(days) if (1..=MAX_RETENTION_DAYS).contains(&days) => u32::try_from(days).ok(),
                Ok(_) => {
                    violations.invalid(
                        "experimental-delete-older-than-days",
                        format!("must be between 1 and {MAX_RETENTION_DAYS}"),
                    );
                    None
                }
                Err(_) => {
                    violations.invalid("experimental-delete-older-than-days", "not an integer");
                    None
                }
            },
            None => None,
        };

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

        let config = credentials.map(|credentials| Self {
            endpoint: optional(snapshot, "endpoint").map(str::to_string),
            bucket,
            region: optional(snapshot, "region").map(str::to_string),
            path: optional(snapshot, "path").map(str::to_string),
            attributes: optional(snapshot, "attributes").map(str::to_string),
            storage_class: optional(snapshot, "storage-class").map(str::to_string),
            tls_ca_chain,
            s3_api_version,
            s3_uri_style: optional(snapshot, "s3-uri-style").map(str::to_string),
            delete_older_than_days,
            credentials,
        });

        match config {
            Some(config) => violations.finish(config),
            // Unreachable unless credentials failed, in which case finish errs.
            None => Err(violations
                .finish(())
                .expect_err("credentials violation was recorded")),
        }
    }

    /// Assemble the relation payload from this config and the resolved secret.
    pub fn assemble(&self, secret: &ResolvedSecret) -> Result<CredentialPayload, AssembleError> {
        let missing = secret.missing_keys(&["access-key", "secret-key"]);
        if !missing.is_empty() {
            return Err(SecretError::MissingFields {
                id: self.credentials.to_string(),
                fields: missing,
            }
            .into());
        }

        let mut payload = CredentialPayload::new();
        payload.insert_opt("endpoint", self.endpoint.as_deref());
        payload.insert_opt("bucket", self.bucket.as_deref());
        payload.insert_opt("region", self.region.as_deref());
        payload.insert_opt("path", self.path.as_deref());
        payload.insert_opt("attributes", self.attributes.as_deref());
        payload.insert_opt("storage-class", self.storage_class.as_deref());
        payload.insert_opt("tls-ca-chain", self.tls_ca_chain.as_deref());
        payload.insert_opt("s3-api-version", self.s3_api_version.as_deref());
        payload.insert_opt("s3-uri-style", self.s3_uri_style.as_deref());
        if let Some(days) = self.delete_older_than_days {
            payload.insert("delete-older-than-days", days.to_string());
        }

        merge_secret_fields(&mut payload, secret, &[]);
        ensure_required(&payload, S3_REQUIRED_FIELDS)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    const URI: &str = "secret:0123456789abcdefghij";

    fn snapshot(pairs: &[(&str, &str)]) -> ConfigSnapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn secret() -> ResolvedSecret {
        ResolvedSecret::from_pairs([("access-key", "AK"), ("secret-key", "SK")])
    }

    #[test]
    fn test_minimal_valid_config() {
        let config =
            S3Config::validate(&snapshot(&[("bucket", "mybucket"), ("credentials", URI)])).unwrap();
        assert_eq!(config.bucket.as_deref(), Some("mybucket"));
        assert_eq!(config.credentials.as_str(), URI);
    }

    #[test]
    fn test_missing_credentials_reported() {
        let errors = S3Config::validate(&snapshot(&[("bucket", "mybucket")])).unwrap_err();
        assert_eq!(errors.missing_fields(), vec!["credentials"]);
    }

    #[test]
    fn test_invalid_api_version() {
        let errors = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("credentials", URI),
            ("s3-api-version", "5"),
        ]))
        .unwrap_err();
        assert_eq!(errors.invalid_fields(), vec!["s3-api-version"]);
    }

    #[test]
    fn test_violations_are_collected_not_short_circuited() {
        let errors = S3Config::validate(&snapshot(&[
            ("bucket", "Bad_Bucket"),
            ("s3-api-version", "5"),
            ("experimental-delete-older-than-days", "0"),
        ]))
        .unwrap_err();
        assert_eq!(errors.missing_fields(), vec!["credentials"]);
        assert_eq!(
            errors.invalid_fields(),
            vec![
                "bucket",
                "experimental-delete-older-than-days",
                "s3-api-version"
            ]
        );
    }

    #[test]
    fn test_bucket_naming_rules() {
        for name in ["mybucket", "my-bucket-01", "a1b"] {
            assert!(valid_bucket_name(name), "{name} should be accepted");
        }
        for name in ["ab", "My-Bucket", "xn--bucket", "bucket-s3alias", "-abc-"] {
            assert!(!valid_bucket_name(name), "{name} should be rejected");
        }
    }

    #[test]
    fn test_retention_days_bounds() {
        for raw in ["1", "9999999"] {
            let config = S3Config::validate(&snapshot(&[
                ("credentials", URI),
                ("experimental-delete-older-than-days", raw),
            ]))
            .unwrap();
            assert!(config.delete_older_than_days.is_some());
        }
        for raw in ["0", "-4", "10000000", "soon"] {
            let errors = S3Config::validate(&snapshot(&[
                ("credentials", URI),
                ("experimental-delete-older-than-days", raw),
            ]))
            .unwrap_err();
            assert_eq!(
                errors.invalid_fields(),
                vec!["experimental-delete-older-than-days"]
            );
        }
    }

    #[test]
    fn test_tls_ca_chain_republished_as_json_list() {
        let cert = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----";
        let encoded = base64::engine::general_purpose::STANDARD.encode(cert);
        let config = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("credentials", URI),
            ("tls-ca-chain", &encoded),
        ]))
        .unwrap();
        let chain: Vec<String> = serde_json::from_str(config.tls_ca_chain.as_deref().unwrap()).unwrap();
        assert_eq!(chain, vec![cert.to_string()]);
    }

    #[test]
    fn test_assemble_merges_config_and_secret() {
        let config = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("region", "eu-west-1"),
            ("credentials", URI),
        ]))
        .unwrap();
        let payload = config.assemble(&secret()).unwrap();
        assert_eq!(payload.get("bucket"), Some("mybucket"));
        assert_eq!(payload.get("region"), Some("eu-west-1"));
        assert_eq!(payload.get("access-key"), Some("AK"));
        assert_eq!(payload.get("secret-key"), Some("SK"));
    }

    #[test]
    fn test_assemble_renames_retention_field() {
        let config = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("credentials", URI),
            ("experimental-delete-older-than-days", "30"),
        ]))
        .unwrap();
        let payload = config.assemble(&secret()).unwrap();
        assert_eq!(payload.get("delete-older-than-days"), Some("30"));
        assert_eq!(payload.get("experimental-delete-older-than-days"), None);
    }

    #[test]
    fn test_assemble_requires_secret_keys() {
        let config =
            S3Config::validate(&snapshot(&[("bucket", "mybucket"), ("credentials", URI)])).unwrap();
        let err = config
            .assemble(&ResolvedSecret::from_pairs([("access-key", "AK")]))
            .unwrap_err();
        assert!(err.to_string().contains("secret-key"));
    }

    #[test]
    fn test_assemble_requires_bucket() {
        let config = S3Config::validate(&snapshot(&[("credentials", URI)])).unwrap();
        let err = config.assemble(&secret()).unwrap_err();
        assert!(matches!(err, AssembleError::Incomplete { .. }));
        assert!(err.to_string().contains("'bucket'"));
    }

    #[test]
    fn test_assemble_secret_precedence() {
        let config = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("endpoint", "https://config.example.com"),
            ("credentials", URI),
        ]))
        .unwrap();
        let secret = ResolvedSecret::from_pairs([
            ("access-key", "AK"),
            ("secret-key", "SK"),
            ("endpoint", "https://secret.example.com"),
        ]);
        let payload = config.assemble(&secret).unwrap();
        assert_eq!(payload.get("endpoint"), Some("https://secret.example.com"));
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let config = S3Config::validate(&snapshot(&[
            ("bucket", "mybucket"),
            ("credentials", URI),
        ]))
        .unwrap();
        let first = config.assemble(&secret()).unwrap();
        let second = config.assemble(&secret()).unwrap();
        assert_eq!(first, second);
    }
}
