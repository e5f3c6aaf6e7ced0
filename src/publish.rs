//! # Relation Publisher
//!
//! Writes the assembled payload into every connected consumer's data bag.
//!
//! Every write replaces the full bag. Bags whose current content already
//! equals the payload are skipped, so re-running a cycle with unchanged
//! inputs performs no writes at all.

use tracing::{debug, info};

use crate::metrics;
use crate::provider::CredentialPayload;
use crate::relation::{DataBag, RelationError, RelationStore};

/// What one publication pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Bags rewritten with new content.
    pub published: usize,
    /// Bags left untouched because their content already matched.
    pub skipped: usize,
}

impl PublishOutcome {
    pub fn total(&self) -> usize {
        self.published + self.skipped
    }
}

/// Publish `payload` to every connected binding.
///
/// Fails on the first write error; bags written before the failure keep their
/// new content, bags after it keep their previous content, and the next cycle
/// republishes everything.
pub async fn publish(
    store: &dyn RelationStore,
    payload: &CredentialPayload,
) -> Result<PublishOutcome, RelationError> {
    let bindings = store.bindings().await?;
    metrics::set_relations_connected(bindings.len() as i64);

    let target: DataBag = payload.fields().clone();
    let mut outcome = PublishOutcome::default();

    for binding in bindings {
        let current = store.read_bag(binding.id).await?;
        if current == target {
            debug!(
                relation = binding.id,
                application = %binding.application,
                "relation data unchanged, skipping write"
            );
            metrics::increment_relation_writes_skipped();
            outcome.skipped += 1;
            continue;
        }

        store.write_bag(binding.id, &target).await?;
        info!(
            relation = binding.id,
            application = %binding.application,
            "published connection parameters"
        );
        metrics::increment_relations_published();
        outcome.published += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::MemoryRelationStore;

    fn payload() -> CredentialPayload {
        let mut payload = CredentialPayload::new();
        payload.insert("bucket", "mybucket");
        payload.insert("access-key", "AK");
        payload.insert("secret-key", "SK");
        payload
    }

    #[tokio::test]
    async fn test_publishes_to_every_binding() {
        let store = MemoryRelationStore::new();
        store.join(1, "analytics");
        store.join(2, "backup");
        let outcome = publish(&store, &payload()).await.unwrap();
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(
            store.bag(1).unwrap().get("bucket").map(String::as_str),
            Some("mybucket")
        );
        assert_eq!(store.bag(1).unwrap(), store.bag(2).unwrap());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let store = MemoryRelationStore::new();
        store.join(1, "analytics");
        publish(&store, &payload()).await.unwrap();
        let before = store.bag(1).unwrap();

        let outcome = publish(&store, &payload()).await.unwrap();
        assert_eq!(outcome.published, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.bag(1).unwrap(), before);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_content_is_fully_replaced() {
        let store = MemoryRelationStore::new();
        store.join(1, "analytics");
        let mut stale = DataBag::new();
        stale.insert("bucket".to_string(), "oldbucket".to_string());
        stale.insert("endpoint".to_string(), "https://gone.example.com".to_string());
        store.write_bag(1, &stale).await.unwrap();

        publish(&store, &payload()).await.unwrap();
        let bag = store.bag(1).unwrap();
        assert_eq!(bag.get("bucket").map(String::as_str), Some("mybucket"));
        assert!(!bag.contains_key("endpoint"));
    }

    #[tokio::test]
    async fn test_no_bindings_is_fine() {
        let store = MemoryRelationStore::new();
        let outcome = publish(&store, &payload()).await.unwrap();
        assert_eq!(outcome.total(), 0);
    }
}
