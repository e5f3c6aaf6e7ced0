//! # Constants
//!
//! Shared constants used throughout the integrator.
//!
//! The per-provider required-field tables live here rather than inside the
//! assembler logic so that changing the published-field policy is a data edit,
//! not a code change.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default observation-loop poll interval (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Minimum observation-loop poll interval (seconds)
/// Shorter intervals mostly burn CPU re-reading unchanged files
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// Fields an assembled S3 payload must carry, non-empty
pub const S3_REQUIRED_FIELDS: &[&str] = &["bucket", "access-key", "secret-key"];

/// Fields an assembled Azure Storage payload must carry, non-empty,
/// in addition to exactly one credential field
pub const AZURE_REQUIRED_FIELDS: &[&str] = &["container", "storage-account", "connection-protocol"];

/// Secret content keys accepted as the Azure credential; the resolved secret
/// must provide at least one, and `secret-key`/`client-secret` are mutually
/// exclusive
pub const AZURE_CREDENTIAL_FIELDS: &[&str] = &["secret-key", "client-secret", "connection-string"];

/// Fields an assembled GCS payload must carry, non-empty
pub const GCS_REQUIRED_FIELDS: &[&str] = &["bucket", "sa-key"];

/// Payload fields masked by the `connection-info` command
pub const MASKED_FIELDS: &[&str] = &[
    "access-key",
    "secret-key",
    "client-secret",
    "connection-string",
    "sa-key",
];
