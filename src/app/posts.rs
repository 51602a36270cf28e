use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::error::FeedError;
use crate::domain::path::{CollectionPath, DocumentPath};
use crate::domain::post::Post;
use crate::domain::session::Session;
use crate::infra::store::{Caller, Document, DocumentStore, Query};

/// Where the client should go after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "to", content = "postId", rename_all = "snake_case")]
pub enum Navigation {
    Home,
    Post(String),
}

impl Navigation {
    pub fn href(&self) -> String {
        match self {
            Navigation::Home => "/".to_string(),
            Navigation::Post(id) => format!("/{}", id),
        }
    }
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn DocumentStore>,
}

impl PostService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>, FeedError> {
        let doc = self
            .store
            .get_document(&DocumentPath::post(post_id))
            .await
            .map_err(FeedError::Channel)?;
        doc.map(|doc| Post::from_document(&doc).map_err(FeedError::from))
            .transpose()
    }

    /// Newest first, skipping documents that do not parse as posts.
    pub async fn list_feed(&self) -> Result<Vec<Post>, FeedError> {
        let docs = self
            .store
            .run_query(&Query::newest_first(CollectionPath::posts()))
            .await
            .map_err(FeedError::Channel)?;
        Ok(posts_from_documents(&docs))
    }

    /// Author-only removal. Comments and likes under the post are not touched.
    pub async fn delete_post(
        &self,
        post_id: &str,
        session: &Session,
    ) -> Result<Navigation, FeedError> {
        let post = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))?;
        if !post.is_authored_by(session) {
            return Err(FeedError::NotAuthor);
        }

        self.store
            .delete_document(&Caller::from(session), &DocumentPath::post(post_id))
            .await
            .map_err(|err| {
                warn!(error = %err, post_id, "failed to delete post");
                FeedError::WriteRejected(err)
            })?;

        info!(post_id, author_id = %session.user_id, "post deleted");
        Ok(Navigation::Home)
    }
}

pub fn posts_from_documents(docs: &[Document]) -> Vec<Post> {
    docs.iter()
        .filter_map(|doc| match Post::from_document(doc) {
            Ok(post) => Some(post),
            Err(err) => {
                warn!(error = %err, path = %doc.path, "skipping malformed post");
                None
            }
        })
        .collect()
}
