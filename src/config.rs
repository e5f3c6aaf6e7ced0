//! # Configuration
//!
//! Raw configuration snapshots and the field-level validation plumbing shared
//! by the per-provider validators.
//!
//! A snapshot is the flat option map as currently set by the operator. It is
//! re-read fresh at the start of every dispatch cycle; nothing in it is cached
//! across cycles. Validators collect *all* violations instead of stopping at
//! the first one, so a single status message can name every offending option.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;

/// Flat option-name → scalar-value map, one per dispatch cycle.
pub type ConfigSnapshot = BTreeMap<String, String>;

/// Source of configuration snapshots.
///
/// Implementations must return the *current* state on every call; the
/// dispatcher never caches a snapshot across cycles.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<ConfigSnapshot>;
}

/// In-memory config source, used in tests and one-shot tooling.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    snapshot: std::sync::Mutex<ConfigSnapshot>,
}

impl MemoryConfigSource {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: std::sync::Mutex::new(snapshot),
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.snapshot
            .lock()
            .expect("config snapshot lock poisoned")
            .insert(key.to_string(), value.to_string());
    }

    pub fn unset(&self, key: &str) {
        self.snapshot
            .lock()
            .expect("config snapshot lock poisoned")
            .remove(key);
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn load(&self) -> Result<ConfigSnapshot> {
        Ok(self
            .snapshot
            .lock()
            .expect("config snapshot lock poisoned")
            .clone())
    }
}

/// What is wrong with a single option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    /// Mandatory option is unset or empty.
    Missing,
    /// Option is set but the value is not acceptable.
    Invalid(String),
}

/// One option-level violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub issue: FieldIssue,
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Names of options rejected as missing, sorted.
    pub fn missing_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .errors
            .iter()
            .filter(|e| e.issue == FieldIssue::Missing)
            .map(|e| e.field.as_str())
            .collect();
        fields.sort_unstable();
        fields
    }

    /// Names of options rejected as invalid, sorted.
    pub fn invalid_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .errors
            .iter()
            .filter(|e| matches!(e.issue, FieldIssue::Invalid(_)))
            .map(|e| e.field.as_str())
            .collect();
        fields.sort_unstable();
        fields
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        let missing = self.missing_fields();
        if !missing.is_empty() {
            parts.push(format!("missing config(s): {}", quote_join(&missing)));
        }
        let invalid = self.invalid_fields();
        if !invalid.is_empty() {
            parts.push(format!("invalid config(s): {}", quote_join(&invalid)));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Accumulates [`FieldError`]s during one validation pass.
#[derive(Debug, Default)]
pub struct Violations {
    errors: Vec<FieldError>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(&mut self, field: &str) {
        self.errors.push(FieldError {
            field: field.to_string(),
            issue: FieldIssue::Missing,
        });
    }

    pub fn invalid(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            issue: FieldIssue::Invalid(reason.into()),
        });
    }

    /// Finish the pass: `Ok(value)` when nothing was collected.
    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationErrors {
                errors: self.errors,
            })
        }
    }
}

/// Look up an option, treating the empty string as unset.
pub fn optional<'a>(snapshot: &'a ConfigSnapshot, key: &str) -> Option<&'a str> {
    match snapshot.get(key).map(String::as_str) {
        None | Some("") => None,
        Some(value) => Some(value),
    }
}

/// `'a', 'b', 'c'` rendering used in status messages.
pub fn quote_join(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!("'{f}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split a PEM bundle into its individual certificates.
///
/// Certificates are returned whole, BEGIN/END markers included. Anything
/// outside the markers (comments, blank lines) is dropped.
pub fn parse_ca_chain(ca_chain_pem: &str) -> Result<Vec<String>, String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut chain = Vec::new();
    let mut rest = ca_chain_pem;
    while let Some(start) = rest.find(BEGIN) {
        let body = &rest[start..];
        let Some(end) = body.find(END) else {
            return Err("certificate is missing its end marker".to_string());
        };
        chain.push(body[..end + END.len()].to_string());
        rest = &body[end + END.len()..];
    }

    if chain.is_empty() {
        return Err("no certificate found in chain".to_string());
    }
    Ok(chain)
}

/// Decode a base64 PEM bundle into a JSON-encoded list of certificates, the
/// form in which the chain is republished to consumers.
pub fn decode_ca_chain(encoded: &str) -> Result<String, String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| "not a valid base64 encoded string".to_string())?;
    let pem = String::from_utf8(decoded).map_err(|_| "decoded chain is not UTF-8".to_string())?;
    let chain = parse_ca_chain(&pem)?;
    serde_json::to_string(&chain).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCC\n-----END CERTIFICATE-----";

    #[test]
    fn test_optional_treats_empty_as_unset() {
        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert("bucket".to_string(), String::new());
        snapshot.insert("region".to_string(), "eu-west-1".to_string());
        assert_eq!(optional(&snapshot, "bucket"), None);
        assert_eq!(optional(&snapshot, "region"), Some("eu-west-1"));
        assert_eq!(optional(&snapshot, "endpoint"), None);
    }

    #[test]
    fn test_violations_collects_all() {
        let mut violations = Violations::new();
        violations.missing("credentials");
        violations.invalid("s3-api-version", "allowed values: '2', '4'");
        violations.missing("bucket");
        let errors = violations.finish(()).unwrap_err();
        assert_eq!(errors.missing_fields(), vec!["bucket", "credentials"]);
        assert_eq!(errors.invalid_fields(), vec!["s3-api-version"]);
        assert_eq!(
            errors.to_string(),
            "missing config(s): 'bucket', 'credentials'; invalid config(s): 's3-api-version'"
        );
    }

    #[test]
    fn test_violations_empty_is_ok() {
        let violations = Violations::new();
        assert!(violations.finish(42).is_ok());
    }

    #[test]
    fn test_parse_ca_chain_single() {
        let chain = parse_ca_chain(CERT).unwrap();
        assert_eq!(chain, vec![CERT.to_string()]);
    }

    #[test]
    fn test_parse_ca_chain_multiple() {
        let bundle = format!("{CERT}\n{CERT}\n");
        let chain = parse_ca_chain(&bundle).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_parse_ca_chain_empty_input() {
        assert!(parse_ca_chain("just some text").is_err());
    }

    #[test]
    fn test_parse_ca_chain_unterminated() {
        assert!(parse_ca_chain("-----BEGIN CERTIFICATE-----\nabc").is_err());
    }

    #[test]
    fn test_decode_ca_chain_roundtrip() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(CERT);
        let json = decode_ca_chain(&encoded).unwrap();
        let chain: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(chain, vec![CERT.to_string()]);
    }

    #[test]
    fn test_decode_ca_chain_rejects_bad_base64() {
        let err = decode_ca_chain("%%%not-base64%%%").unwrap_err();
        assert!(err.contains("base64"));
    }
}
