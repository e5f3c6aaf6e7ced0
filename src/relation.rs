//! # Relations
//!
//! Connected consumer applications and the [`RelationStore`] seam to the
//! relation-data transport.
//!
//! A binding is one connected consumer; it owns a writable key/value data bag
//! on our side of the relation. The integrator keeps no state of its own
//! beyond what sits in those bags.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// The key/value bag written for one consumer.
pub type DataBag = BTreeMap<String, String>;

/// One connected consumer application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationBinding {
    pub id: u32,
    pub application: String,
}

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("failed to enumerate relations: {0}")]
    Enumerate(String),

    #[error("failed to read relation data for relation {id}: {detail}")]
    ReadFailure { id: u32, detail: String },

    #[error("failed to write relation data for relation {id}: {detail}")]
    WriteFailure { id: u32, detail: String },
}

/// Seam to the relation-data transport.
///
/// Writes replace the whole bag; the transport applies them atomically per
/// bag, so consumers never observe a half-updated payload.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Currently connected consumers.
    async fn bindings(&self) -> Result<Vec<RelationBinding>, RelationError>;

    /// Current content of the given relation's bag.
    async fn read_bag(&self, id: u32) -> Result<DataBag, RelationError>;

    /// Replace the given relation's bag wholesale.
    async fn write_bag(&self, id: u32, bag: &DataBag) -> Result<(), RelationError>;
}

/// In-memory relation store, used in tests and one-shot tooling.
///
/// Tracks the number of writes performed so idempotence ("no spurious
/// writes") is observable.
#[derive(Debug, Default)]
pub struct MemoryRelationStore {
    relations: Mutex<BTreeMap<u32, (String, DataBag)>>,
    writes: AtomicU64,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a consumer with an empty bag.
    pub fn join(&self, id: u32, application: &str) {
        self.relations
            .lock()
            .expect("relation store lock poisoned")
            .insert(id, (application.to_string(), DataBag::new()));
    }

    /// Disconnect a consumer, dropping its bag.
    pub fn depart(&self, id: u32) {
        self.relations
            .lock()
            .expect("relation store lock poisoned")
            .remove(&id);
    }

    pub fn bag(&self, id: u32) -> Option<DataBag> {
        self.relations
            .lock()
            .expect("relation store lock poisoned")
            .get(&id)
            .map(|(_, bag)| bag.clone())
    }

    /// Total number of bag writes performed since construction.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn bindings(&self) -> Result<Vec<RelationBinding>, RelationError> {
        Ok(self
            .relations
            .lock()
            .expect("relation store lock poisoned")
            .iter()
            .map(|(id, (application, _))| RelationBinding {
                id: *id,
                application: application.clone(),
            })
            .collect())
    }

    async fn read_bag(&self, id: u32) -> Result<DataBag, RelationError> {
        self.relations
            .lock()
            .expect("relation store lock poisoned")
            .get(&id)
            .map(|(_, bag)| bag.clone())
            .ok_or_else(|| RelationError::ReadFailure {
                id,
                detail: "relation is not connected".to_string(),
            })
    }

    async fn write_bag(&self, id: u32, bag: &DataBag) -> Result<(), RelationError> {
        let mut relations = self.relations.lock().expect("relation store lock poisoned");
        let Some((_, stored)) = relations.get_mut(&id) else {
            return Err(RelationError::WriteFailure {
                id,
                detail: "relation is not connected".to_string(),
            });
        };
        *stored = bag.clone();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
