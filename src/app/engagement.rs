use std::sync::Arc;
use tracing::{info, warn};

use crate::app::error::FeedError;
use crate::app::modal::ModalContext;
use crate::app::posts::Navigation;
use crate::app::presence::EngagementSummary;
use crate::domain::engagement::{CommentFields, Like};
use crate::domain::path::{CollectionPath, DocumentPath};
use crate::domain::session::Session;
use crate::infra::store::{Caller, DocumentStore, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

#[derive(Clone)]
pub struct EngagementService {
    store: Arc<dyn DocumentStore>,
}

impl EngagementService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Upserts the caller's like; repeating it leaves a single document.
    pub async fn like_post(&self, post_id: &str, session: &Session) -> Result<(), FeedError> {
        let path = DocumentPath::like(post_id, &session.user_id);
        self.store
            .set_document(&Caller::from(session), &path, Like::fields_for(session))
            .await
            .map_err(|err| {
                warn!(error = %err, post_id, user_id = %session.user_id, "failed to like post");
                FeedError::WriteRejected(err)
            })
    }

    pub async fn unlike_post(&self, post_id: &str, session: &Session) -> Result<(), FeedError> {
        let path = DocumentPath::like(post_id, &session.user_id);
        self.store
            .delete_document(&Caller::from(session), &path)
            .await
            .map_err(|err| {
                warn!(error = %err, post_id, user_id = %session.user_id, "failed to unlike post");
                FeedError::WriteRejected(err)
            })
    }

    /// Flips the like according to the `liked` flag the caller currently shows.
    pub async fn toggle_like(
        &self,
        post_id: &str,
        liked: bool,
        session: &Session,
    ) -> Result<LikeOutcome, FeedError> {
        if liked {
            self.unlike_post(post_id, session).await?;
            Ok(LikeOutcome::Unliked)
        } else {
            self.like_post(post_id, session).await?;
            Ok(LikeOutcome::Liked)
        }
    }

    /// Reads the like document directly, for callers without a live snapshot.
    pub async fn is_liked(&self, post_id: &str, session: &Session) -> Result<bool, FeedError> {
        let path = DocumentPath::like(post_id, &session.user_id);
        let doc = self
            .store
            .get_document(&path)
            .await
            .map_err(FeedError::Channel)?;
        Ok(doc.is_some())
    }

    /// One-shot counts for list pages.
    pub async fn summary(
        &self,
        post_id: &str,
        session: Option<&Session>,
    ) -> Result<EngagementSummary, FeedError> {
        let likes_query = Query::collection(CollectionPath::likes(post_id));
        let comments_query = Query::collection(CollectionPath::comments(post_id));
        let (likes, comments) = tokio::try_join!(
            self.store.run_query(&likes_query),
            self.store.run_query(&comments_query),
        )
        .map_err(FeedError::Channel)?;

        let likes: Vec<Like> = likes
            .iter()
            .filter_map(|doc| Like::from_document(doc).ok())
            .collect();
        Ok(EngagementSummary::compute(&likes, comments.len(), session))
    }

    pub async fn add_comment(
        &self,
        post_id: &str,
        session: &Session,
        text: &str,
    ) -> Result<String, FeedError> {
        if text.trim().is_empty() {
            return Err(FeedError::Invalid("comment text is empty".to_string()));
        }
        let post = DocumentPath::post(post_id);
        if self
            .store
            .get_document(&post)
            .await
            .map_err(FeedError::Channel)?
            .is_none()
        {
            return Err(FeedError::NotFound(format!("post {}", post_id)));
        }

        let fields = CommentFields::authored(session, text).into_map()?;
        let path = self
            .store
            .create_document(&Caller::from(session), &CollectionPath::comments(post_id), fields)
            .await
            .map_err(|err| {
                warn!(error = %err, post_id, "failed to create comment");
                FeedError::WriteRejected(err)
            })?;

        info!(post_id, comment_id = %path.id(), "comment created");
        Ok(path.id().to_string())
    }

    /// Posts a reply to the post the overlay targets, then closes it and
    /// points the caller at that post's page.
    pub async fn reply_to_active(
        &self,
        modal: &ModalContext,
        session: &Session,
        text: &str,
    ) -> Result<Navigation, FeedError> {
        let post_id = modal
            .active_post_id()
            .ok_or_else(|| FeedError::Invalid("no post selected".to_string()))?;
        self.add_comment(&post_id, session, text).await?;
        modal.close();
        Ok(Navigation::Post(post_id))
    }
}
