//! In-memory repository.
//!
//! Events are keyed by `(feed, dedupe_key)` and overwritten on every upsert.
//! REST payloads are keyed by `(endpoint, scope, hash)`; an identical payload
//! stored twice keeps the first copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{Repository, RepositoryError, RestPayloadRecord};
use crate::domain::events::{FeedKind, NormalizedEvent};

type EventKey = (FeedKind, String);
type PayloadKey = (String, Option<String>, String);

/// Idempotent repository backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    events: RwLock<HashMap<EventKey, NormalizedEvent>>,
    payloads: RwLock<HashMap<PayloadKey, RestPayloadRecord>>,
    event_writes: AtomicU64,
    batch_writes: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct events stored.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Number of distinct events stored for one feed.
    #[must_use]
    pub fn count_of(&self, kind: FeedKind) -> usize {
        self.events.read().keys().filter(|(k, _)| *k == kind).count()
    }

    /// Stored event by natural identity.
    #[must_use]
    pub fn get(&self, kind: FeedKind, key: &str) -> Option<NormalizedEvent> {
        self.events.read().get(&(kind, key.to_string())).cloned()
    }

    /// All stored events of one feed, ordered by event time.
    #[must_use]
    pub fn events_of(&self, kind: FeedKind) -> Vec<NormalizedEvent> {
        let mut events: Vec<NormalizedEvent> = self
            .events
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, event)| event.clone())
            .collect();
        events.sort_by_key(NormalizedEvent::event_timestamp);
        events
    }

    /// Number of distinct REST payloads stored.
    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.payloads.read().len()
    }

    /// Stored REST payloads for one endpoint.
    #[must_use]
    pub fn payloads_for(&self, endpoint: &str) -> Vec<RestPayloadRecord> {
        self.payloads
            .read()
            .values()
            .filter(|record| record.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Upsert calls received, counting a batch as one.
    #[must_use]
    pub fn write_calls(&self) -> u64 {
        self.event_writes.load(Ordering::Relaxed)
    }

    /// Batch upsert calls received.
    #[must_use]
    pub fn batch_writes(&self) -> u64 {
        self.batch_writes.load(Ordering::Relaxed)
    }

    /// Whether [`Repository::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), RepositoryError> {
        if self.is_closed() {
            return Err(RepositoryError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn upsert_event(&self, event: &NormalizedEvent) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.events
            .write()
            .insert((event.kind(), event.dedupe_key()), event.clone());
        self.event_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn upsert_events(&self, events: &[NormalizedEvent]) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        {
            let mut stored = self.events.write();
            for event in events {
                stored.insert((event.kind(), event.dedupe_key()), event.clone());
            }
        }
        self.event_writes.fetch_add(1, Ordering::Relaxed);
        self.batch_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn store_rest_payload(&self, record: &RestPayloadRecord) -> Result<(), RepositoryError> {
        self.ensure_open()?;
        self.payloads
            .write()
            .entry(record.natural_key())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Repository already closed");
        } else {
            tracing::info!(
                events = self.event_count(),
                payloads = self.payload_count(),
                "Repository closed"
            );
        }
        Ok(())
    }
}
