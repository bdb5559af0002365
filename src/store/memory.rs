use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::StoreError;
use crate::store::{
    Document, DocumentStore, Fields, Precondition, Query, Snapshot, Subscription,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DocKey {
    collection: String,
    id: String,
}

impl DocKey {
    fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum StoreEvent {
    Changed {
        collection: String,
        id: String,
        document: Option<Document>,
    },
    Disconnected(String),
}

/// In-process document store with push notifications.
///
/// Writes to one document are atomic and are broadcast while the document's
/// shard lock is held, so subscribers observe them in application order.
#[derive(Clone)]
pub struct MemoryStore {
    documents: Arc<DashMap<DocKey, Document>>,
    events_tx: broadcast::Sender<StoreEvent>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MemoryStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            documents: Arc::new(DashMap::new()),
            events_tx,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.event_buffer_size)
    }

    /// Writes a whole document, replacing whatever was there.
    pub fn put(&self, collection: &str, id: &str, document: Document) {
        let key = DocKey::new(collection, id);
        let entry = self.documents.entry(key).insert(document);
        let _ = self.events_tx.send(StoreEvent::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            document: Some(entry.value().clone()),
        });
    }

    pub fn remove(&self, collection: &str, id: &str) {
        let key = DocKey::new(collection, id);
        if self.documents.remove(&key).is_some() {
            let _ = self.events_tx.send(StoreEvent::Changed {
                collection: collection.to_string(),
                id: id.to_string(),
                document: None,
            });
        }
    }

    /// Simulates losing the backend: reads and writes fail and live
    /// subscriptions receive an error event.
    pub fn set_offline(&self, offline: bool) {
        let was_offline = self.offline.swap(offline, Ordering::SeqCst);
        if offline && !was_offline {
            let _ = self
                .events_tx
                .send(StoreEvent::Disconnected("store unavailable".to_string()));
        }
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, collection: &str, id: &str) -> Option<Document> {
        self.documents
            .get(&DocKey::new(collection, id))
            .map(|entry| entry.value().clone())
    }

    fn collection_snapshots(&self, collection: &str) -> Vec<Snapshot> {
        self.documents
            .iter()
            .filter(|entry| entry.key().collection == collection)
            .map(|entry| Snapshot {
                id: entry.key().id.clone(),
                data: entry.value().clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.ensure_online()?;

        let id = Uuid::new_v4().simple().to_string();
        let mut document = Document::new();
        fields.apply_to(&mut document, Utc::now());

        match self.documents.entry(DocKey::new(collection, &id)) {
            Entry::Occupied(_) => {
                return Err(StoreError::Backend(format!("{collection}/{id} already exists")));
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(document);
                let _ = self.events_tx.send(StoreEvent::Changed {
                    collection: collection.to_string(),
                    id: id.clone(),
                    document: Some(entry.value().clone()),
                });
            }
        }

        debug!(collection, id = %id, "document created");
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self.snapshot(collection, id))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;

        let mut entry = self
            .documents
            .get_mut(&DocKey::new(collection, id))
            .ok_or(StoreError::NotFound)?;

        if let Some(precondition) = precondition {
            precondition.check(entry.value())?;
        }

        fields.apply_to(entry.value_mut(), Utc::now());
        let _ = self.events_tx.send(StoreEvent::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            document: Some(entry.value().clone()),
        });

        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.ensure_online()?;

        let mut entry = self
            .documents
            .entry(DocKey::new(collection, id))
            .or_default();

        fields.apply_to(entry.value_mut(), Utc::now());
        let _ = self.events_tx.send(StoreEvent::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            document: Some(entry.value().clone()),
        });

        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        self.ensure_online()?;
        Ok(query.apply(self.collection_snapshots(collection)))
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<Document>>, StoreError> {
        self.ensure_online()?;

        let events = BroadcastStream::new(self.events_tx.subscribe());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.snapshot(collection, id)));

        let store = self.clone();
        let collection = collection.to_string();
        let id = id.to_string();

        let producer = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                let outgoing = match event {
                    Ok(StoreEvent::Changed {
                        collection: changed_collection,
                        id: changed_id,
                        document,
                    }) => {
                        if changed_collection != collection || changed_id != id {
                            continue;
                        }
                        Ok(document)
                    }
                    Ok(StoreEvent::Disconnected(reason)) => Err(StoreError::Backend(reason)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(collection = %collection, id = %id, skipped, "subscriber lagged; resyncing");
                        Ok(store.snapshot(&collection, &id))
                    }
                };

                if tx.send(outgoing).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, producer))
    }

    async fn subscribe_query(
        &self,
        collection: &str,
        query: Query,
    ) -> Result<Subscription<Vec<Snapshot>>, StoreError> {
        self.ensure_online()?;

        let events = BroadcastStream::new(self.events_tx.subscribe());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(query.apply(self.collection_snapshots(collection))));

        let store = self.clone();
        let collection = collection.to_string();

        let producer = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                let outgoing = match event {
                    Ok(StoreEvent::Changed {
                        collection: changed_collection,
                        ..
                    }) => {
                        if changed_collection != collection {
                            continue;
                        }
                        Ok(query.apply(store.collection_snapshots(&collection)))
                    }
                    Ok(StoreEvent::Disconnected(reason)) => Err(StoreError::Backend(reason)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(collection = %collection, skipped, "query subscriber lagged; resyncing");
                        Ok(query.apply(store.collection_snapshots(&collection)))
                    }
                };

                if tx.send(outgoing).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, producer))
    }
}
