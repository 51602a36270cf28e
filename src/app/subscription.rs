//! Live snapshots of a document or query, owned by the view that opened them.

use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::path::DocumentPath;
use crate::infra::store::{Document, DocumentStore, Query, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotState<T> {
    Loading,
    Ready(T),
    Failed(StoreError),
}

impl<T> SnapshotState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            SnapshotState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SnapshotState::Loading)
    }
}

type SharedSender<T> = Arc<Mutex<Option<watch::Sender<SnapshotState<T>>>>>;

/// A live subscription. Every delivered snapshot replaces the previous one.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    label: String,
    rx: watch::Receiver<SnapshotState<T>>,
    sender: SharedSender<T>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Publishes under the sender lock so nothing lands after `unsubscribe` returns.
fn publish<T>(sender: &SharedSender<T>, state: SnapshotState<T>) -> bool {
    match lock(sender).as_ref() {
        Some(tx) => {
            tx.send_replace(state);
            true
        }
        None => false,
    }
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts delivering without waiting for the first snapshot.
    pub fn spawn<R, C, M>(label: String, connect: C, map: M) -> Self
    where
        R: Send + 'static,
        C: Future<Output = Result<BoxStream<'static, Result<R, StoreError>>, StoreError>>
            + Send
            + 'static,
        M: Fn(R) -> Result<T, StoreError> + Send + 'static,
    {
        let (tx, rx) = watch::channel(SnapshotState::Loading);
        let sender: SharedSender<T> = Arc::new(Mutex::new(Some(tx)));

        let task_sender = sender.clone();
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let mut stream = match connect.await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, subscription = %task_label, "failed to open subscription");
                    publish(&task_sender, SnapshotState::Failed(err));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let state = match item.and_then(&map) {
                    Ok(value) => SnapshotState::Ready(value),
                    Err(err) => {
                        warn!(
                            error = %err,
                            subscription = %task_label,
                            "subscription channel failed"
                        );
                        publish(&task_sender, SnapshotState::Failed(err));
                        return;
                    }
                };
                if !publish(&task_sender, state) {
                    return;
                }
            }
        });

        Self {
            label,
            rx,
            sender,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current local snapshot.
    pub fn state(&self) -> SnapshotState<T> {
        self.rx.borrow().clone()
    }

    /// Receiver for awaiting new snapshots; closes once unsubscribed.
    pub fn watch(&self) -> watch::Receiver<SnapshotState<T>> {
        self.rx.clone()
    }

    /// Waits for the first snapshot (or the failure that replaced it).
    pub async fn ready(&self) -> Result<T, StoreError> {
        let mut rx = self.rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                SnapshotState::Ready(value) => return Ok(value),
                SnapshotState::Failed(err) => return Err(err),
                SnapshotState::Loading => {}
            }
            if rx.changed().await.is_err() {
                return Err(StoreError::Unavailable(format!(
                    "{} closed before its first snapshot",
                    self.label
                )));
            }
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stops delivery. Returns `false` when it was already stopped.
    pub fn unsubscribe(&self) -> bool {
        let released = lock(&self.sender).take().is_some();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        if released {
            debug!(subscription = %self.label, "unsubscribed");
        }
        released
    }
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn document<M>(store: Arc<dyn DocumentStore>, path: DocumentPath, map: M) -> Self
    where
        M: Fn(Option<Document>) -> Result<T, StoreError> + Send + 'static,
    {
        let label = path.to_string();
        let connect = async move { store.subscribe_document(&path).await };
        Self::spawn(label, connect, map)
    }

    pub fn query<M>(store: Arc<dyn DocumentStore>, query: Query, map: M) -> Self
    where
        M: Fn(Vec<Document>) -> Result<T, StoreError> + Send + 'static,
    {
        let label = query.collection.to_string();
        let connect = async move { store.subscribe_query(&query).await };
        Self::spawn(label, connect, map)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        lock(&self.sender).take();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::CollectionPath;
    use crate::infra::memory::MemoryStore;
    use crate::infra::store::{Caller, Fields};
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn count_docs(docs: Vec<Document>) -> Result<usize, StoreError> {
        Ok(docs.len())
    }

    #[tokio::test]
    async fn delivers_initial_then_replacement_snapshots() {
        let store = MemoryStore::new("memory://blobs").unwrap();
        let sub = Subscription::query(
            Arc::new(store.clone()),
            Query::collection(CollectionPath::likes("p1")),
            count_docs,
        );
        assert_eq!(sub.ready().await.unwrap(), 0);

        let mut rx = sub.watch();
        store
            .set_document(
                &Caller::user("u1"),
                &DocumentPath::like("p1", "u1"),
                fields(json!({ "username": "Ann" })),
            )
            .await
            .unwrap();
        let state = rx
            .wait_for(|state| state.ready() == Some(&1))
            .await
            .unwrap()
            .clone();
        assert_eq!(state, SnapshotState::Ready(1));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let store = MemoryStore::new("memory://blobs").unwrap();
        let sub = Subscription::query(
            Arc::new(store),
            Query::collection(CollectionPath::posts()),
            count_docs,
        );
        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_failed_state() {
        let connect = async {
            Err::<BoxStream<'static, Result<usize, StoreError>>, _>(StoreError::PermissionDenied(
                "read posts".into(),
            ))
        };
        let sub: Subscription<usize> =
            Subscription::spawn("posts".into(), connect, |value: usize| Ok(value));
        assert!(matches!(
            sub.ready().await,
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(sub.state(), SnapshotState::Failed(_)));
    }
}
