//! # Reconciler
//!
//! The dispatch cycle that turns operator input into published relation data.
//!
//! ## Dispatch Flow
//!
//! 1. Load a fresh configuration snapshot
//! 2. Validate it for the configured provider
//! 3. Resolve the referenced secret
//! 4. Assemble the credential payload
//! 5. Publish the payload to every connected consumer
//!
//! The same cycle runs for every trigger kind, so the handler wiring stays a
//! single function instead of a graph of per-event handlers. Any step's
//! failure short-circuits the cycle and maps to a Blocked or Waiting verdict;
//! previously published bags are left untouched until the next successful
//! cycle. There are no internal retries: transient failures surface in the
//! status and the next externally delivered trigger re-runs the whole cycle.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{optional, ConfigSource, ValidationErrors};
use crate::metrics;
use crate::provider::{self, AssembleError, CredentialPayload, ProviderKind};
use crate::publish::{publish, PublishOutcome};
use crate::relation::{RelationError, RelationStore};
use crate::secrets::{SecretError, SecretStore};
use crate::status::StatusVerdict;

/// External event that caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConfigChanged,
    SecretChanged,
    RelationJoined,
    RelationChanged,
    Tick,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Trigger::ConfigChanged => "config-changed",
            Trigger::SecretChanged => "secret-changed",
            Trigger::RelationJoined => "relation-joined",
            Trigger::RelationChanged => "relation-changed",
            Trigger::Tick => "tick",
        };
        write!(f, "{name}")
    }
}

/// Why a cycle stopped short of publishing.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("credentials not set")]
    CredentialsNotSet,

    #[error(transparent)]
    Config(#[from] ValidationErrors),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Relation(#[from] RelationError),

    #[error("cannot read configuration: {0}")]
    Source(String),
}

impl DispatchError {
    /// Operator-facing verdict for this failure.
    pub fn verdict(&self) -> StatusVerdict {
        match self {
            DispatchError::CredentialsNotSet => {
                StatusVerdict::Waiting("credentials not set".to_string())
            }
            _ => StatusVerdict::Blocked(self.to_string()),
        }
    }
}

/// Re-runs the full resolve → validate → assemble → publish cycle on every
/// trigger.
pub struct Reconciler {
    provider: ProviderKind,
    config_source: Arc<dyn ConfigSource>,
    secrets: Arc<dyn SecretStore>,
    relations: Arc<dyn RelationStore>,
}

impl Reconciler {
    pub fn new(
        provider: ProviderKind,
        config_source: Arc<dyn ConfigSource>,
        secrets: Arc<dyn SecretStore>,
        relations: Arc<dyn RelationStore>,
    ) -> Self {
        Self {
            provider,
            config_source,
            secrets,
            relations,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Run one dispatch cycle and surface the resulting verdict.
    ///
    /// Idempotent regardless of which trigger fired: unchanged inputs produce
    /// no relation writes and the same verdict.
    pub async fn dispatch(&self, trigger: Trigger) -> StatusVerdict {
        let start = Instant::now();
        metrics::increment_dispatch_cycles();
        info!(%trigger, provider = %self.provider, "dispatching");

        let verdict = match self.cycle().await {
            Ok(outcome) => {
                info!(
                    published = outcome.published,
                    skipped = outcome.skipped,
                    "dispatch cycle complete"
                );
                StatusVerdict::Active
            }
            Err(err) => {
                let verdict = err.verdict();
                match &verdict {
                    StatusVerdict::Blocked(_) => {
                        metrics::increment_dispatch_errors();
                        warn!(%trigger, reason = %err, "dispatch cycle blocked");
                    }
                    _ => info!(%trigger, reason = %err, "dispatch cycle waiting"),
                }
                verdict
            }
        };

        metrics::observe_dispatch_duration(start.elapsed().as_secs_f64());
        metrics::set_status(verdict.state());
        verdict
    }

    /// Assemble the payload without publishing it. Used by the
    /// `connection-info` command.
    pub async fn connection_info(&self) -> Result<CredentialPayload, DispatchError> {
        self.assemble().await
    }

    async fn cycle(&self) -> Result<PublishOutcome, DispatchError> {
        let payload = self.assemble().await?;
        Ok(publish(self.relations.as_ref(), &payload).await?)
    }

    async fn assemble(&self) -> Result<CredentialPayload, DispatchError> {
        let snapshot = self
            .config_source
            .load()
            .await
            .map_err(|e| DispatchError::Source(e.to_string()))?;

        // An operator who has not wired credentials yet is waiting, not wrong.
        if optional(&snapshot, "credentials").is_none() {
            return Err(DispatchError::CredentialsNotSet);
        }

        let config = provider::validate(self.provider, &snapshot)?;
        let secret = self.secrets.resolve(config.credentials()).await?;
        Ok(config.assemble(&secret)?)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, MemoryConfigSource};
    use crate::relation::MemoryRelationStore;
    use crate::secrets::MemorySecretStore;

    const URI: &str = "secret:0123456789abcdefghij";

    struct Harness {
        config: Arc<MemoryConfigSource>,
        secrets: Arc<MemorySecretStore>,
        relations: Arc<MemoryRelationStore>,
        reconciler: Reconciler,
    }

    fn harness(provider: ProviderKind, options: &[(&str, &str)]) -> Harness {
        let snapshot: ConfigSnapshot = options
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let config = Arc::new(MemoryConfigSource::new(snapshot));
        let secrets = Arc::new(MemorySecretStore::new());
        let relations = Arc::new(MemoryRelationStore::new());
        let reconciler = Reconciler::new(
            provider,
            Arc::clone(&config) as Arc<dyn ConfigSource>,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            Arc::clone(&relations) as Arc<dyn RelationStore>,
        );
        Harness {
            config,
            secrets,
            relations,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_complete_s3_cycle_is_active() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);
        h.relations.join(1, "consumer");

        let verdict = h.reconciler.dispatch(Trigger::ConfigChanged).await;
        assert_eq!(verdict, StatusVerdict::Active);

        let bag = h.relations.bag(1).unwrap();
        assert_eq!(bag.get("bucket").map(String::as_str), Some("mybucket"));
        assert_eq!(bag.get("access-key").map(String::as_str), Some("AK"));
        assert_eq!(bag.get("secret-key").map(String::as_str), Some("SK"));
    }

    #[tokio::test]
    async fn test_no_credentials_option_waits_without_writing() {
        let h = harness(ProviderKind::S3, &[("bucket", "mybucket")]);
        h.relations.join(1, "consumer");

        let verdict = h.reconciler.dispatch(Trigger::ConfigChanged).await;
        assert_eq!(
            verdict,
            StatusVerdict::Waiting("credentials not set".to_string())
        );
        assert!(h.relations.bag(1).unwrap().is_empty());
        assert_eq!(h.relations.write_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_blocks_and_names_field() {
        let h = harness(
            ProviderKind::S3,
            &[
                ("bucket", "mybucket"),
                ("credentials", URI),
                ("s3-api-version", "5"),
            ],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);

        let verdict = h.reconciler.dispatch(Trigger::ConfigChanged).await;
        match verdict {
            StatusVerdict::Blocked(reason) => assert!(reason.contains("'s3-api-version'")),
            other => panic!("expected blocked, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_secret_blocks() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        let verdict = h.reconciler.dispatch(Trigger::SecretChanged).await;
        assert_eq!(
            verdict,
            StatusVerdict::Blocked(format!("the secret '{URI}' does not exist"))
        );
    }

    #[tokio::test]
    async fn test_ungranted_secret_blocks() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);
        h.secrets.deny(URI);
        let verdict = h.reconciler.dispatch(Trigger::SecretChanged).await;
        assert_eq!(
            verdict,
            StatusVerdict::Blocked(format!(
                "permission for secret '{URI}' has not been granted"
            ))
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_preserves_published_state() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);
        h.relations.join(1, "consumer");
        assert!(h.reconciler.dispatch(Trigger::ConfigChanged).await.is_active());
        let published = h.relations.bag(1).unwrap();

        // Secret revoked: the next cycle blocks but does not clear the bag.
        h.secrets.remove(URI);
        let verdict = h.reconciler.dispatch(Trigger::SecretChanged).await;
        assert!(matches!(verdict, StatusVerdict::Blocked(_)));
        assert_eq!(h.relations.bag(1).unwrap(), published);
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent_across_triggers() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);
        h.relations.join(1, "consumer");

        for trigger in [
            Trigger::ConfigChanged,
            Trigger::SecretChanged,
            Trigger::RelationJoined,
            Trigger::RelationChanged,
            Trigger::Tick,
        ] {
            assert!(h.reconciler.dispatch(trigger).await.is_active());
        }
        // One write for the first cycle; the rest matched and were skipped.
        assert_eq!(h.relations.write_count(), 1);
    }

    #[tokio::test]
    async fn test_secret_rotation_propagates_on_next_cycle() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK1"), ("secret-key", "SK1")]);
        h.relations.join(1, "consumer");
        h.reconciler.dispatch(Trigger::ConfigChanged).await;

        h.secrets
            .insert(URI, [("access-key", "AK2"), ("secret-key", "SK2")]);
        h.reconciler.dispatch(Trigger::SecretChanged).await;
        assert_eq!(
            h.relations.bag(1).unwrap().get("access-key").map(String::as_str),
            Some("AK2")
        );
    }

    #[tokio::test]
    async fn test_late_joiner_receives_payload() {
        let h = harness(
            ProviderKind::S3,
            &[("bucket", "mybucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("access-key", "AK"), ("secret-key", "SK")]);
        h.reconciler.dispatch(Trigger::ConfigChanged).await;

        h.relations.join(5, "latecomer");
        h.reconciler.dispatch(Trigger::RelationJoined).await;
        assert_eq!(
            h.relations.bag(5).unwrap().get("bucket").map(String::as_str),
            Some("mybucket")
        );
    }

    #[tokio::test]
    async fn test_gcs_cycle() {
        let h = harness(
            ProviderKind::Gcs,
            &[("bucket", "my-bucket"), ("credentials", URI)],
        );
        h.secrets
            .insert(URI, [("service-account-json", "{\"type\":\"service_account\"}")]);
        h.relations.join(1, "consumer");
        assert!(h.reconciler.dispatch(Trigger::ConfigChanged).await.is_active());
        assert!(h.relations.bag(1).unwrap().contains_key("sa-key"));
    }

    #[tokio::test]
    async fn test_config_change_repub_after_blocked() {
        let h = harness(ProviderKind::Azure, &[("credentials", URI)]);
        h.secrets.insert(URI, [("secret-key", "SK")]);
        h.relations.join(1, "consumer");

        let verdict = h.reconciler.dispatch(Trigger::ConfigChanged).await;
        match verdict {
            StatusVerdict::Blocked(reason) => {
                assert!(reason.contains("missing config(s)"));
                assert!(reason.contains("'container'"));
            }
            other => panic!("expected blocked, got {other}"),
        }

        // Operator fixes the configuration; the next trigger recovers.
        h.config.set("container", "mycontainer");
        h.config.set("storage-account", "myaccount");
        h.config.set("connection-protocol", "wasbs");
        assert!(h.reconciler.dispatch(Trigger::ConfigChanged).await.is_active());
        assert_eq!(
            h.relations.bag(1).unwrap().get("secret-key").map(String::as_str),
            Some("SK")
        );
    }
}
