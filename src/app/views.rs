//! Live views: the feed and a single post, each with live comments and likes.
//!
//! Each view owns its subscriptions and releases them on unmount or drop.

use futures::future::{select_all, BoxFuture};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::app::modal::ModalContext;
use crate::app::posts::posts_from_documents;
use crate::app::presence::EngagementSummary;
use crate::app::subscription::{SnapshotState, Subscription};
use crate::domain::engagement::{Comment, Like};
use crate::domain::icon::{post_actions, PostAction};
use crate::domain::path::{CollectionPath, DocumentPath};
use crate::domain::post::Post;
use crate::domain::session::Session;
use crate::infra::store::{Document, DocumentStore, Query, StoreError};
use tracing::warn;

fn map_post(doc: Option<Document>) -> Result<Option<Post>, StoreError> {
    doc.map(|doc| Post::from_document(&doc).map_err(StoreError::from))
        .transpose()
}

fn map_posts(docs: Vec<Document>) -> Result<Vec<Post>, StoreError> {
    Ok(posts_from_documents(&docs))
}

fn map_comments(docs: Vec<Document>) -> Result<Vec<Comment>, StoreError> {
    Ok(docs
        .iter()
        .filter_map(|doc| match Comment::from_document(doc) {
            Ok(comment) => Some(comment),
            Err(err) => {
                warn!(error = %err, path = %doc.path, "skipping malformed comment");
                None
            }
        })
        .collect())
}

fn map_likes(docs: Vec<Document>) -> Result<Vec<Like>, StoreError> {
    Ok(docs
        .iter()
        .filter_map(|doc| Like::from_document(doc).ok())
        .collect())
}

/// Likes and comments of one post in the feed, kept live alongside it.
struct PostEngagement {
    comments: Subscription<Vec<Comment>>,
    likes: Subscription<Vec<Like>>,
    comments_rx: watch::Receiver<SnapshotState<Vec<Comment>>>,
    likes_rx: watch::Receiver<SnapshotState<Vec<Like>>>,
}

impl PostEngagement {
    fn mount(store: Arc<dyn DocumentStore>, post_id: &str) -> Self {
        let comments = Subscription::query(
            store.clone(),
            Query::collection(CollectionPath::comments(post_id)),
            map_comments,
        );
        let likes = Subscription::query(
            store,
            Query::collection(CollectionPath::likes(post_id)),
            map_likes,
        );
        Self {
            comments_rx: comments.watch(),
            likes_rx: likes.watch(),
            comments,
            likes,
        }
    }

    fn summary(&self, session: Option<&Session>) -> EngagementSummary {
        let likes = self.likes.state().ready().cloned().unwrap_or_default();
        let comment_count = self.comments.state().ready().map_or(0, Vec::len);
        EngagementSummary::compute(&likes, comment_count, session)
    }
}

/// The feed plus live engagement for every post it currently shows.
///
/// Engagement subscriptions follow the posts snapshot through [`FeedView::sync`].
pub struct FeedView {
    store: Arc<dyn DocumentStore>,
    posts: Subscription<Vec<Post>>,
    posts_rx: watch::Receiver<SnapshotState<Vec<Post>>>,
    engagement: HashMap<String, PostEngagement>,
}

impl FeedView {
    pub fn mount(store: Arc<dyn DocumentStore>) -> Self {
        let posts = Subscription::query(
            store.clone(),
            Query::newest_first(CollectionPath::posts()),
            map_posts,
        );
        Self {
            store,
            posts_rx: posts.watch(),
            posts,
            engagement: HashMap::new(),
        }
    }

    pub fn posts(&self) -> SnapshotState<Vec<Post>> {
        self.posts.state()
    }

    pub fn subscription(&self) -> &Subscription<Vec<Post>> {
        &self.posts
    }

    /// Opens engagement channels for newly listed posts and releases those
    /// of posts that left the feed.
    pub fn sync(&mut self) {
        let Some(posts) = self.posts.state().ready().cloned() else {
            return;
        };
        let listed: HashSet<&str> = posts.iter().map(|post| post.id.as_str()).collect();
        self.engagement.retain(|post_id, _| listed.contains(post_id.as_str()));
        for post in &posts {
            if !self.engagement.contains_key(&post.id) {
                let engagement = PostEngagement::mount(self.store.clone(), &post.id);
                self.engagement.insert(post.id.clone(), engagement);
            }
        }
    }

    /// Whether every listed post has its first like and comment snapshots.
    pub fn is_settled(&self) -> bool {
        !self.posts.state().is_loading()
            && self.engagement.values().all(|engagement| {
                !engagement.likes.state().is_loading()
                    && !engagement.comments.state().is_loading()
            })
    }

    /// First failure among the posts channel and every engagement channel.
    pub fn error(&self) -> Option<StoreError> {
        failure(&self.posts.state()).or_else(|| {
            self.engagement.values().find_map(|engagement| {
                failure(&engagement.likes.state())
                    .or_else(|| failure(&engagement.comments.state()))
            })
        })
    }

    pub fn summary(&self, post_id: &str, session: Option<&Session>) -> EngagementSummary {
        self.engagement
            .get(post_id)
            .map(|engagement| engagement.summary(session))
            .unwrap_or_default()
    }

    /// Posts newest first, each with its live engagement figures.
    pub fn entries(&self, session: Option<&Session>) -> Vec<(Post, EngagementSummary)> {
        let posts = self.posts.state().ready().cloned().unwrap_or_default();
        posts
            .into_iter()
            .map(|post| {
                let summary = self.summary(&post.id, session);
                (post, summary)
            })
            .collect()
    }

    /// Resolves on the next snapshot from any channel; `false` once a channel has closed.
    pub async fn changed(&mut self) -> bool {
        let mut waits: Vec<BoxFuture<'_, bool>> =
            Vec::with_capacity(1 + self.engagement.len() * 2);
        let posts_rx = &mut self.posts_rx;
        waits.push(Box::pin(async move { posts_rx.changed().await.is_ok() }));
        for engagement in self.engagement.values_mut() {
            let PostEngagement {
                comments_rx,
                likes_rx,
                ..
            } = engagement;
            waits.push(Box::pin(async move { comments_rx.changed().await.is_ok() }));
            waits.push(Box::pin(async move { likes_rx.changed().await.is_ok() }));
        }
        let (open, _, _) = select_all(waits).await;
        open
    }

    /// Marks every channel's current snapshot as seen.
    pub fn mark_seen(&mut self) {
        self.posts_rx.borrow_and_update();
        for engagement in self.engagement.values_mut() {
            engagement.comments_rx.borrow_and_update();
            engagement.likes_rx.borrow_and_update();
        }
    }

    pub fn unmount(&self) {
        self.posts.unsubscribe();
        for engagement in self.engagement.values() {
            engagement.comments.unsubscribe();
            engagement.likes.unsubscribe();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub title: String,
    pub post: Post,
    pub comments: Vec<Comment>,
    pub summary: EngagementSummary,
    pub actions: Vec<PostAction>,
}

pub struct PostView {
    store: Arc<dyn DocumentStore>,
    post_id: String,
    post: Subscription<Option<Post>>,
    comments: Subscription<Vec<Comment>>,
    likes: Subscription<Vec<Like>>,
}

impl PostView {
    pub fn mount(store: Arc<dyn DocumentStore>, post_id: &str) -> Self {
        let post = Subscription::document(store.clone(), DocumentPath::post(post_id), map_post);
        let comments = Subscription::query(
            store.clone(),
            Query::newest_first(CollectionPath::comments(post_id)),
            map_comments,
        );
        let likes = Subscription::query(
            store.clone(),
            Query::collection(CollectionPath::likes(post_id)),
            map_likes,
        );
        Self {
            store,
            post_id: post_id.to_string(),
            post,
            comments,
            likes,
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    /// Points the view at another post, releasing the old subscriptions first.
    pub fn retarget(&mut self, post_id: &str) {
        if post_id == self.post_id {
            return;
        }
        self.unmount();
        *self = Self::mount(self.store.clone(), post_id);
    }

    pub fn post(&self) -> &Subscription<Option<Post>> {
        &self.post
    }

    pub fn comments(&self) -> &Subscription<Vec<Comment>> {
        &self.comments
    }

    pub fn likes(&self) -> &Subscription<Vec<Like>> {
        &self.likes
    }

    /// First failure among the three channels, if any.
    pub fn error(&self) -> Option<StoreError> {
        [
            failure(&self.post.state()),
            failure(&self.comments.state()),
            failure(&self.likes.state()),
        ]
        .into_iter()
        .flatten()
        .next()
    }

    /// Figures from whatever snapshots have arrived; missing ones count as empty.
    pub fn summary(&self, session: Option<&Session>) -> EngagementSummary {
        let likes = self.likes.state().ready().cloned().unwrap_or_default();
        let comment_count = self.comments.state().ready().map_or(0, Vec::len);
        EngagementSummary::compute(&likes, comment_count, session)
    }

    pub fn detail(&self, session: &Session) -> Option<PostDetail> {
        let post = self.post.state().ready().cloned().flatten()?;
        let comments = self.comments.state().ready().cloned().unwrap_or_default();
        let summary = self.summary(Some(session));
        let actions = post_actions(
            &post,
            session,
            summary.liked,
            summary.like_count,
            summary.comment_count,
        );
        Some(PostDetail {
            title: post.page_title(),
            post,
            comments,
            summary,
            actions,
        })
    }

    /// Comment-icon click on this post.
    pub fn open_comments(&self, modal: &ModalContext) {
        modal.toggle_for(&self.post_id);
    }

    pub fn watchers(&self) -> PostWatchers {
        PostWatchers {
            post: self.post.watch(),
            comments: self.comments.watch(),
            likes: self.likes.watch(),
        }
    }

    pub fn unmount(&self) {
        self.post.unsubscribe();
        self.comments.unsubscribe();
        self.likes.unsubscribe();
    }
}

fn failure<T>(state: &SnapshotState<T>) -> Option<StoreError> {
    match state {
        SnapshotState::Failed(err) => Some(err.clone()),
        _ => None,
    }
}

/// Waits on all three channels of a [`PostView`]; they update independently.
pub struct PostWatchers {
    post: watch::Receiver<SnapshotState<Option<Post>>>,
    comments: watch::Receiver<SnapshotState<Vec<Comment>>>,
    likes: watch::Receiver<SnapshotState<Vec<Like>>>,
}

impl PostWatchers {
    /// Resolves on the next snapshot from any channel; `false` once any channel has closed.
    pub async fn changed(&mut self) -> bool {
        let result = tokio::select! {
            result = self.post.changed() => result,
            result = self.comments.changed() => result,
            result = self.likes.changed() => result,
        };
        result.is_ok()
    }

    /// Marks every channel's current snapshot as seen, coalescing pending updates.
    pub fn mark_seen(&mut self) {
        self.post.borrow_and_update();
        self.comments.borrow_and_update();
        self.likes.borrow_and_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::post::PostFields;
    use crate::infra::memory::MemoryStore;
    use crate::infra::store::{Caller, Fields};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[tokio::test]
    async fn retarget_releases_previous_subscriptions() {
        let store = MemoryStore::new("memory://blobs").unwrap();
        let mut view = PostView::mount(Arc::new(store), "p1");
        let old_likes = view.likes().watch();
        view.retarget("p2");
        assert_eq!(view.post_id(), "p2");
        assert!(view.likes().is_active());
        assert!(old_likes.has_changed().is_err());
    }

    #[tokio::test]
    async fn summary_tracks_like_snapshot() {
        let store = MemoryStore::new("memory://blobs").unwrap();
        let session = Session::new("u1", "Ann", "ann");
        let view = PostView::mount(Arc::new(store.clone()), "p1");
        view.likes().ready().await.unwrap();
        assert!(!view.summary(Some(&session)).liked);

        let mut likes = view.likes().watch();
        store
            .set_document(
                &Caller::user("u1"),
                &DocumentPath::like("p1", "u1"),
                fields(json!({ "username": "Ann" })),
            )
            .await
            .unwrap();
        likes
            .wait_for(|state| state.ready().map_or(false, |likes| likes.len() == 1))
            .await
            .unwrap();

        let summary = view.summary(Some(&session));
        assert!(summary.liked);
        assert_eq!(summary.like_count, 1);
    }

    #[tokio::test]
    async fn feed_view_follows_engagement_of_listed_posts() {
        let store = MemoryStore::new("memory://blobs").unwrap();
        let session = Session::new("u1", "Ann", "ann");
        let caller = Caller::from(&session);
        let post = PostFields::authored(&session, "hello").into_map().unwrap();
        store
            .set_document(&caller, &DocumentPath::post("p1"), post)
            .await
            .unwrap();

        let mut view = FeedView::mount(Arc::new(store.clone()));
        view.subscription().ready().await.unwrap();
        view.sync();
        while !view.is_settled() {
            assert!(view.changed().await);
            view.mark_seen();
        }
        assert_eq!(view.summary("p1", Some(&session)).like_count, 0);

        view.mark_seen();
        let like = fields(json!({ "username": "Ann" }));
        store
            .set_document(&caller, &DocumentPath::like("p1", "u1"), like)
            .await
            .unwrap();
        let liked = tokio::time::timeout(Duration::from_secs(2), async {
            while view.summary("p1", Some(&session)).like_count == 0 {
                assert!(view.changed().await);
                view.mark_seen();
            }
        })
        .await;
        assert!(liked.is_ok());
        assert!(view.summary("p1", Some(&session)).liked);

        store
            .delete_document(&caller, &DocumentPath::post("p1"))
            .await
            .unwrap();
        let emptied = tokio::time::timeout(Duration::from_secs(2), async {
            while !view.posts().ready().map_or(false, Vec::is_empty) {
                assert!(view.changed().await);
                view.mark_seen();
            }
        })
        .await;
        assert!(emptied.is_ok());
        view.sync();
        assert!(view.entries(Some(&session)).is_empty());
        assert_eq!(view.summary("p1", Some(&session)), EngagementSummary::default());
    }
}
