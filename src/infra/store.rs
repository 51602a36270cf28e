//! The remote store seam: a document database with realtime snapshots plus
//! blob storage. Adapters live next to this module.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::path::{self, CollectionPath, DocumentPath, InvalidPath, COMMENTS, LIKES, POSTS};
use crate::domain::post::fields::AUTHOR_ID;
use crate::domain::session::Session;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<InvalidPath> for StoreError {
    fn from(err: InvalidPath) -> Self {
        StoreError::InvalidPath(err.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
    /// Assigned by the store on first write, kept across overwrites.
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A collection read with its ordering attached to the query itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: CollectionPath,
    pub order: Option<Direction>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            order: None,
        }
    }

    /// Order by creation time; ties resolve by write sequence in the same direction.
    pub fn order_by_created(mut self, direction: Direction) -> Self {
        self.order = Some(direction);
        self
    }

    pub fn newest_first(collection: CollectionPath) -> Self {
        Self::collection(collection).order_by_created(Direction::Descending)
    }

    /// Sort `(sequence, document)` pairs the way this query promises.
    pub fn sort(&self, docs: &mut [(u64, Document)]) {
        match self.order {
            Some(Direction::Ascending) => {
                docs.sort_by(|(a_seq, a), (b_seq, b)| {
                    a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
                });
            }
            Some(Direction::Descending) => {
                docs.sort_by(|(a_seq, a), (b_seq, b)| {
                    b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
                });
            }
            None => docs.sort_by(|(_, a), (_, b)| a.path.cmp(&b.path)),
        }
    }
}

pub type DocumentStream = BoxStream<'static, Result<Option<Document>, StoreError>>;
pub type QueryStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

/// Who is issuing a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(Option<String>);

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&Session> for Caller {
    fn from(session: &Session) -> Self {
        Caller::user(session.user_id.clone())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Stream of whole-document snapshots; the first item is the current state.
    async fn subscribe_document(&self, path: &DocumentPath) -> Result<DocumentStream, StoreError>;

    /// Stream of whole result sets; the first item is the current state.
    async fn subscribe_query(&self, query: &Query) -> Result<QueryStream, StoreError>;

    /// Creates a document under a store-assigned id.
    async fn create_document(
        &self,
        caller: &Caller,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError>;

    /// Creates or overwrites the document at `path`.
    async fn set_document(
        &self,
        caller: &Caller,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError>;

    /// Merges top-level fields into an existing document.
    async fn update_document(
        &self,
        caller: &Caller,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), StoreError>;

    /// Removes the document; subcollections are left in place.
    async fn delete_document(&self, caller: &Caller, path: &DocumentPath) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload_blob(
        &self,
        caller: &Caller,
        storage_path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn download_url(&self, storage_path: &str) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Set,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Set => "set",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

enum Target<'a> {
    Post,
    Like { user_id: &'a str },
    Comment,
    Other,
}

fn classify(path: &DocumentPath) -> Target<'_> {
    let parts: Vec<&str> = path.as_str().split('/').collect();
    match parts.as_slice() {
        [POSTS, _] => Target::Post,
        [POSTS, _, LIKES, user_id] => Target::Like { user_id },
        [POSTS, _, COMMENTS, _] => Target::Comment,
        _ => Target::Other,
    }
}

fn denied(kind: WriteKind, path: &DocumentPath) -> StoreError {
    StoreError::PermissionDenied(format!("{} on {}", kind.as_str(), path))
}

/// Access rules shared by every adapter.
///
/// `existing` is the document currently stored at `path`, `incoming` the
/// fields being written (absent for deletes).
pub fn check_write(
    kind: WriteKind,
    path: &DocumentPath,
    caller: &Caller,
    existing: Option<&Document>,
    incoming: Option<&Fields>,
) -> Result<(), StoreError> {
    let Some(user_id) = caller.user_id() else {
        return Err(StoreError::PermissionDenied("authentication required".to_string()));
    };
    let incoming_author = incoming.and_then(|fields| fields.get(AUTHOR_ID)).and_then(Value::as_str);
    let existing_author = existing.and_then(|doc| doc.field_str(AUTHOR_ID));

    let allowed = match classify(path) {
        Target::Post => match (kind, existing_author) {
            (WriteKind::Create, _) | (WriteKind::Set, None) => incoming_author == Some(user_id),
            (WriteKind::Update, Some(author)) => {
                author == user_id && incoming_author.map_or(true, |next| next == author)
            }
            (WriteKind::Set, Some(author)) => author == user_id && incoming_author == Some(user_id),
            (WriteKind::Delete, Some(author)) => author == user_id,
            (WriteKind::Delete, None) => true,
            (WriteKind::Update, None) => return Err(StoreError::NotFound(path.to_string())),
        },
        Target::Like { user_id: owner } => owner == user_id,
        Target::Comment => kind == WriteKind::Create && incoming_author == Some(user_id),
        Target::Other => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(denied(kind, path))
    }
}

/// Blob uploads are limited to signed-in callers writing under a post.
pub fn check_upload(caller: &Caller, storage_path: &str) -> Result<(), StoreError> {
    if caller.user_id().is_none() {
        return Err(StoreError::PermissionDenied("authentication required".to_string()));
    }
    match path::blob_post_id(storage_path) {
        Some(_) => Ok(()),
        None => Err(StoreError::PermissionDenied(format!(
            "upload to {}",
            storage_path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn stored(path: DocumentPath, value: Value) -> Document {
        Document {
            path,
            fields: fields(value),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn anonymous_writes_are_denied() {
        let path = DocumentPath::like("p1", "u1");
        let err = check_write(WriteKind::Set, &path, &Caller::anonymous(), None, None).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[test]
    fn likes_are_keyed_by_caller() {
        let caller = Caller::user("u1");
        let own = DocumentPath::like("p1", "u1");
        let other = DocumentPath::like("p1", "u2");
        assert!(check_write(WriteKind::Set, &own, &caller, None, None).is_ok());
        assert!(check_write(WriteKind::Set, &other, &caller, None, None).is_err());
    }

    #[test]
    fn only_author_deletes_post() {
        let path = DocumentPath::post("p1");
        let doc = stored(path.clone(), json!({ "authorId": "u1" }));
        let author = Caller::user("u1");
        let other = Caller::user("u2");
        assert!(check_write(WriteKind::Delete, &path, &author, Some(&doc), None).is_ok());
        assert!(check_write(WriteKind::Delete, &path, &other, Some(&doc), None).is_err());
    }

    #[test]
    fn post_author_cannot_be_spoofed() {
        let path = DocumentPath::post("p1");
        let incoming = fields(json!({ "authorId": "u2", "text": "hi" }));
        let err = check_write(WriteKind::Create, &path, &Caller::user("u1"), None, Some(&incoming));
        assert!(err.is_err());
    }

    #[test]
    fn comments_are_append_only() {
        let path = DocumentPath::comment("p1", "c1");
        let incoming = fields(json!({ "authorId": "u1", "text": "nice" }));
        let caller = Caller::user("u1");
        assert!(check_write(WriteKind::Create, &path, &caller, None, Some(&incoming)).is_ok());
        assert!(check_write(WriteKind::Delete, &path, &caller, None, None).is_err());
    }

    #[test]
    fn descending_query_breaks_ties_by_sequence() {
        let query = Query::newest_first(CollectionPath::posts());
        let mut docs = vec![
            (1, stored(DocumentPath::post("a"), json!({}))),
            (2, stored(DocumentPath::post("b"), json!({}))),
        ];
        query.sort(&mut docs);
        assert_eq!(docs[0].1.id(), "b");
    }
}
