use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::config::AppConfig;
use crate::domain::path::{CollectionPath, DocumentPath};
use crate::infra::store::{
    check_write, Caller, Direction, Document, DocumentStore, DocumentStream, Fields, Query,
    QueryStream, StoreError, WriteKind,
};

/// Notification channel carrying the parent collection of each write.
const CHANGE_CHANNEL: &str = "chirp_documents";

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing required env var: DATABASE_URL"))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Applies the bundled schema; every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/0001_documents.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Document store over a single `documents` table with LISTEN/NOTIFY fan-out.
#[derive(Clone)]
pub struct PgDocumentStore {
    db: Db,
}

impl PgDocumentStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn fetch_document(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        fetch_document(self.db.pool(), path).await
    }

    async fn fetch_query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        fetch_query(self.db.pool(), query).await
    }

    async fn listen(&self) -> Result<PgListener, StoreError> {
        let mut listener = PgListener::connect_with(self.db.pool()).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        Ok(listener)
    }

    async fn write(
        &self,
        kind: WriteKind,
        caller: &Caller,
        path: &DocumentPath,
        fields: Option<Fields>,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query(
            "SELECT path, fields, created_at, updated_at \
             FROM documents WHERE path = $1 FOR UPDATE",
        )
        .bind(path.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row_to_document(&row))
        .transpose()?;

        check_write(kind, path, caller, existing.as_ref(), fields.as_ref())?;

        match (kind, fields) {
            (WriteKind::Delete, _) => {
                if existing.is_none() {
                    return Ok(());
                }
                sqlx::query("DELETE FROM documents WHERE path = $1")
                    .bind(path.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            (WriteKind::Update, Some(fields)) => {
                if existing.is_none() {
                    return Err(StoreError::NotFound(path.to_string()));
                }
                sqlx::query(
                    "UPDATE documents SET fields = fields || $2, updated_at = now() \
                     WHERE path = $1",
                )
                .bind(path.as_str())
                .bind(Json(Value::Object(fields)))
                .execute(&mut *tx)
                .await?;
            }
            (_, Some(fields)) => {
                sqlx::query(
                    "INSERT INTO documents (path, parent, fields) VALUES ($1, $2, $3) \
                     ON CONFLICT (path) DO UPDATE \
                     SET fields = EXCLUDED.fields, updated_at = now()",
                )
                .bind(path.as_str())
                .bind(path.collection().as_str())
                .bind(Json(Value::Object(fields)))
                .execute(&mut *tx)
                .await?;
            }
            (_, None) => {
                return Err(StoreError::Backend(format!(
                    "{} without fields",
                    kind.as_str()
                )))
            }
        }

        // Delivered on commit.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(path.collection().as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(path = %path, kind = kind.as_str(), "document written");
        Ok(())
    }
}

fn row_to_document(row: &PgRow) -> Result<Document, StoreError> {
    let path: String = row.try_get("path")?;
    let Json(fields): Json<Value> = row.try_get("fields")?;
    let fields = match fields {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Serialization(format!(
                "document {} holds non-object fields: {}",
                path, other
            )))
        }
    };
    Ok(Document {
        path: DocumentPath::parse(&path)?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_document(
    pool: &PgPool,
    path: &DocumentPath,
) -> Result<Option<Document>, StoreError> {
    let row = sqlx::query(
        "SELECT path, fields, created_at, updated_at FROM documents WHERE path = $1",
    )
    .bind(path.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|row| row_to_document(&row)).transpose()
}

fn order_clause(order: Option<Direction>) -> &'static str {
    match order {
        Some(Direction::Descending) => "ORDER BY created_at DESC, seq DESC",
        Some(Direction::Ascending) => "ORDER BY created_at ASC, seq ASC",
        None => "ORDER BY path",
    }
}

async fn fetch_query(pool: &PgPool, query: &Query) -> Result<Vec<Document>, StoreError> {
    let sql = format!(
        "SELECT path, fields, created_at, updated_at FROM documents WHERE parent = $1 {}",
        order_clause(query.order)
    );
    let rows = sqlx::query(&sql)
        .bind(query.collection.as_str())
        .fetch_all(pool)
        .await?;

    let mut docs = Vec::with_capacity(rows.len());
    for row in rows {
        docs.push(row_to_document(&row)?);
    }
    Ok(docs)
}

/// Waits for a notification naming `watched`.
async fn next_change(
    listener: &mut PgListener,
    watched: &CollectionPath,
) -> Result<(), StoreError> {
    loop {
        let notification = listener.recv().await?;
        if notification.payload() == watched.as_str() {
            return Ok(());
        }
    }
}

struct Watch<T> {
    listener: PgListener,
    initial: Option<T>,
    finished: bool,
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.fetch_document(path).await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.fetch_query(query).await
    }

    async fn subscribe_document(&self, path: &DocumentPath) -> Result<DocumentStream, StoreError> {
        let listener = self.listen().await?;
        let initial = self.fetch_document(path).await?;
        let pool = self.db.pool().clone();
        let path = path.clone();
        let watched = path.collection();

        let state = Watch {
            listener,
            initial: Some(initial),
            finished: false,
        };
        let stream = stream::unfold(state, move |mut state| {
            let pool = pool.clone();
            let path = path.clone();
            let watched = watched.clone();
            async move {
                if state.finished {
                    return None;
                }
                if let Some(initial) = state.initial.take() {
                    return Some((Ok(initial), state));
                }
                let snapshot = match next_change(&mut state.listener, &watched).await {
                    Ok(()) => fetch_document(&pool, &path).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = &snapshot {
                    warn!(error = %err, path = %path, "document subscription failed");
                    state.finished = true;
                }
                Some((snapshot, state))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn subscribe_query(&self, query: &Query) -> Result<QueryStream, StoreError> {
        let listener = self.listen().await?;
        let initial = self.fetch_query(query).await?;
        let pool = self.db.pool().clone();
        let query = query.clone();

        let state = Watch {
            listener,
            initial: Some(initial),
            finished: false,
        };
        let stream = stream::unfold(state, move |mut state| {
            let pool = pool.clone();
            let query = query.clone();
            async move {
                if state.finished {
                    return None;
                }
                if let Some(initial) = state.initial.take() {
                    return Some((Ok(initial), state));
                }
                let snapshot = match next_change(&mut state.listener, &query.collection).await {
                    Ok(()) => fetch_query(&pool, &query).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = &snapshot {
                    warn!(
                        error = %err,
                        collection = %query.collection,
                        "query subscription failed"
                    );
                    state.finished = true;
                }
                Some((snapshot, state))
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
