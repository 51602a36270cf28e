use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;
use url::Url;

use crate::domain::path::{CollectionPath, DocumentPath};
use crate::infra::store::{
    check_upload, check_write, BlobStore, Caller, Document, DocumentStore, DocumentStream, Fields,
    Query, QueryStream, StoreError, WriteKind,
};

const CHANGE_CAPACITY: usize = 256;

/// In-process document + blob store with realtime snapshots.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    docs: RwLock<BTreeMap<DocumentPath, Stored>>,
    blobs: RwLock<HashMap<String, StoredBlob>>,
    changes: broadcast::Sender<Change>,
    sequence: AtomicU64,
    uploads: AtomicUsize,
    upload_failure: Mutex<Option<String>>,
    public_base: String,
}

struct Stored {
    seq: u64,
    doc: Document,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
enum Change {
    Written(DocumentPath),
    Fault(StoreError),
}

impl MemoryStore {
    pub fn new(public_base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(public_base)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                docs: RwLock::new(BTreeMap::new()),
                blobs: RwLock::new(HashMap::new()),
                changes,
                sequence: AtomicU64::new(0),
                uploads: AtomicUsize::new(0),
                upload_failure: Mutex::new(None),
                public_base: base.as_str().trim_end_matches('/').to_string(),
            }),
        })
    }

    /// Pushes a channel error to every open subscription, ending them.
    pub fn fail_subscriptions(&self, reason: &str) {
        let _ = self
            .inner
            .changes
            .send(Change::Fault(StoreError::Unavailable(reason.to_string())));
    }

    /// Rejects blob uploads with `reason` until cleared with `None`.
    pub fn fail_uploads(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.inner.upload_failure.lock() {
            *failure = reason.map(str::to_string);
        }
    }

    /// Number of upload calls received, rejected ones included.
    pub fn upload_count(&self) -> usize {
        self.inner.uploads.load(Ordering::SeqCst)
    }

    pub async fn blob(&self, storage_path: &str) -> Option<StoredBlob> {
        self.inner.blobs.read().await.get(storage_path).cloned()
    }

    async fn write(
        &self,
        kind: WriteKind,
        caller: &Caller,
        path: &DocumentPath,
        fields: Option<Fields>,
    ) -> Result<(), StoreError> {
        let mut docs = self.inner.docs.write().await;
        let existing = docs.get(path);
        check_write(kind, path, caller, existing.map(|stored| &stored.doc), fields.as_ref())?;

        let now = OffsetDateTime::now_utc();
        match (kind, fields) {
            (WriteKind::Delete, _) => {
                if docs.remove(path).is_none() {
                    return Ok(());
                }
            }
            (WriteKind::Update, Some(fields)) => {
                let stored = docs
                    .get_mut(path)
                    .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                for (key, value) in fields {
                    stored.doc.fields.insert(key, value);
                }
                stored.doc.updated_at = now;
            }
            (_, Some(fields)) => {
                let (seq, created_at) = match existing {
                    Some(stored) => (stored.seq, stored.doc.created_at),
                    None => (self.inner.sequence.fetch_add(1, Ordering::SeqCst), now),
                };
                docs.insert(
                    path.clone(),
                    Stored {
                        seq,
                        doc: Document {
                            path: path.clone(),
                            fields,
                            created_at,
                            updated_at: now,
                        },
                    },
                );
            }
            (_, None) => {
                return Err(StoreError::Backend(format!(
                    "{} without fields",
                    kind.as_str()
                )))
            }
        }
        drop(docs);

        debug!(path = %path, kind = kind.as_str(), "document written");
        let _ = self.inner.changes.send(Change::Written(path.clone()));
        Ok(())
    }
}

impl Inner {
    async fn document(&self, path: &DocumentPath) -> Option<Document> {
        self.docs.read().await.get(path).map(|stored| stored.doc.clone())
    }

    async fn query(&self, query: &Query) -> Vec<Document> {
        let docs = self.docs.read().await;
        let mut matched: Vec<(u64, Document)> = docs
            .values()
            .filter(|stored| stored.doc.path.collection() == query.collection)
            .map(|stored| (stored.seq, stored.doc.clone()))
            .collect();
        drop(docs);
        query.sort(&mut matched);
        matched.into_iter().map(|(_, doc)| doc).collect()
    }
}

/// Waits until a change relevant to `watched` arrives.
///
/// A lagged receiver counts as relevant: snapshots are re-read whole, so
/// missed notifications only cost an extra read.
async fn next_change(
    rx: &mut broadcast::Receiver<Change>,
    watched: &CollectionPath,
) -> Option<Result<(), StoreError>> {
    loop {
        match rx.recv().await {
            Ok(Change::Written(path)) if &path.collection() == watched => return Some(Ok(())),
            Ok(Change::Written(_)) => continue,
            Ok(Change::Fault(err)) => return Some(Err(err)),
            Err(RecvError::Lagged(_)) => return Some(Ok(())),
            Err(RecvError::Closed) => return None,
        }
    }
}

struct Watch<T> {
    rx: broadcast::Receiver<Change>,
    initial: Option<T>,
    finished: bool,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        Ok(self.inner.document(path).await)
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        Ok(self.inner.query(query).await)
    }

    async fn subscribe_document(&self, path: &DocumentPath) -> Result<DocumentStream, StoreError> {
        let rx = self.inner.changes.subscribe();
        let initial = self.inner.document(path).await;
        let inner = self.inner.clone();
        let path = path.clone();
        let watched = path.collection();

        let state = Watch {
            rx,
            initial: Some(initial),
            finished: false,
        };
        let stream = stream::unfold(state, move |mut state| {
            let inner = inner.clone();
            let path = path.clone();
            let watched = watched.clone();
            async move {
                if state.finished {
                    return None;
                }
                if let Some(initial) = state.initial.take() {
                    return Some((Ok(initial), state));
                }
                match next_change(&mut state.rx, &watched).await? {
                    Ok(()) => {
                        let snapshot = inner.document(&path).await;
                        Some((Ok(snapshot), state))
                    }
                    Err(err) => {
                        state.finished = true;
                        Some((Err(err), state))
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn subscribe_query(&self, query: &Query) -> Result<QueryStream, StoreError> {
        let rx = self.inner.changes.subscribe();
        let initial = self.inner.query(query).await;
        let inner = self.inner.clone();
        let query = query.clone();

        let state = Watch {
            rx,
            initial: Some(initial),
            finished: false,
        };
        let stream = stream::unfold(state, move |mut state| {
            let inner = inner.clone();
            let query = query.clone();
            async move {
                if state.finished {
                    return None;
                }
                if let Some(initial) = state.initial.take() {
                    return Some((Ok(initial), state));
                }
                match next_change(&mut state.rx, &query.collection).await? {
                    Ok(()) => {
                        let snapshot = inner.query(&query).await;
                        Some((Ok(snapshot), state))
                    }
                    Err(err) => {
                        state.finished = true;
                        Some((Err(err), state))
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn create_document(
        &self,
        caller: &Caller,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError> {
        let path = collection.doc(&Ulid::new().to_string());
        self.write(WriteKind::Create, caller, &path, Some(fields)).await?;
        Ok(path)
    }

    async fn set_document(
        &self,
        caller: &Caller,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.write(WriteKind::Set, caller, path, Some(fields)).await
    }

    async fn update_document(
        &self,
        caller: &Caller,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.write(WriteKind::Update, caller, path, Some(fields)).await
    }

    async fn delete_document(
        &self,
        caller: &Caller,
        path: &DocumentPath,
    ) -> Result<(), StoreError> {
        self.write(WriteKind::Delete, caller, path, None).await
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn upload_blob(
        &self,
        caller: &Caller,
        storage_path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.inner.uploads.fetch_add(1, Ordering::SeqCst);
        check_upload(caller, storage_path)?;

        let failure = self
            .inner
            .upload_failure
            .lock()
            .map(|failure| failure.clone())
            .unwrap_or(None);
        if let Some(reason) = failure {
            return Err(StoreError::Unavailable(reason));
        }

        self.inner.blobs.write().await.insert(
            storage_path.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download_url(&self, storage_path: &str) -> Result<String, StoreError> {
        if !self.inner.blobs.read().await.contains_key(storage_path) {
            return Err(StoreError::NotFound(storage_path.to_string()));
        }
        Ok(format!("{}/{}", self.inner.public_base, storage_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new("memory://blobs").unwrap()
    }

    #[tokio::test]
    async fn set_keeps_creation_time() {
        let store = store();
        let caller = Caller::user("u1");
        let path = DocumentPath::like("p1", "u1");
        store
            .set_document(&caller, &path, fields(json!({ "username": "Ann" })))
            .await
            .unwrap();
        let first = store.get_document(&path).await.unwrap().unwrap();
        store
            .set_document(&caller, &path, fields(json!({ "username": "Ann B" })))
            .await
            .unwrap();
        let second = store.get_document(&path).await.unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.field_str("username"), Some("Ann B"));
    }

    #[tokio::test]
    async fn query_stream_starts_with_current_state() {
        let store = store();
        let caller = Caller::user("u1");
        store
            .set_document(
                &caller,
                &DocumentPath::like("p1", "u1"),
                fields(json!({ "username": "Ann" })),
            )
            .await
            .unwrap();

        let mut stream = store
            .subscribe_query(&Query::collection(CollectionPath::likes("p1")))
            .await
            .unwrap();
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        store
            .delete_document(&caller, &DocumentPath::like("p1", "u1"))
            .await
            .unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn fault_ends_stream() {
        let store = store();
        let mut stream = store
            .subscribe_document(&DocumentPath::post("p1"))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        store.fail_subscriptions("network lost");
        assert!(matches!(
            stream.next().await,
            Some(Err(StoreError::Unavailable(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn download_url_requires_blob() {
        let store = store();
        let caller = Caller::user("u1");
        assert!(store.download_url("posts/p1/image").await.is_err());
        store
            .upload_blob(&caller, "posts/p1/image", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert_eq!(
            store.download_url("posts/p1/image").await.unwrap(),
            "memory://blobs/posts/p1/image"
        );
    }
}
