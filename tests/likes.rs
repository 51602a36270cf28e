//! Like / Unlike Tests
//!
//! Covers the like upsert, unlike, toggle and derived presence state.

mod common;

use axum::http::StatusCode;
use common::app;
use std::sync::Arc;

use chirp::app::engagement::{EngagementService, LikeOutcome};
use chirp::app::views::PostView;
use chirp::domain::path::{CollectionPath, DocumentPath};
use chirp::infra::store::{Caller, DocumentStore, Query, StoreError};

async fn like_count(app: &common::TestApp, post_id: &str) -> usize {
    app.store
        .run_query(&Query::collection(CollectionPath::likes(post_id)))
        .await
        .unwrap()
        .len()
}

// ===========================================================================
// Service level
// ===========================================================================

#[tokio::test]
async fn like_creates_single_document_keyed_by_user() {
    let app = app();
    let author = app.create_user("u2");
    let user = app.create_user("u1");
    app.seed_post("p1", &author.session, "hello").await;

    let service = EngagementService::new(Arc::new(app.store.clone()));
    service.like_post("p1", &user.session).await.unwrap();
    service.like_post("p1", &user.session).await.unwrap();

    assert_eq!(like_count(&app, "p1").await, 1);
    let like = app.document(&DocumentPath::like("p1", "u1")).await.unwrap();
    assert_eq!(like["username"], "User u1");
}

#[tokio::test]
async fn like_then_unlike_restores_empty_collection() {
    let app = app();
    let user = app.create_user("u1");
    app.seed_post("p1", &user.session, "hello").await;

    let service = EngagementService::new(Arc::new(app.store.clone()));
    let summary = service.summary("p1", Some(&user.session)).await.unwrap();
    assert!(!summary.liked);
    assert_eq!(summary.like_count, 0);

    service.like_post("p1", &user.session).await.unwrap();
    let summary = service.summary("p1", Some(&user.session)).await.unwrap();
    assert!(summary.liked);
    assert_eq!(summary.like_count, 1);

    service.unlike_post("p1", &user.session).await.unwrap();
    service.unlike_post("p1", &user.session).await.unwrap();
    let summary = service.summary("p1", Some(&user.session)).await.unwrap();
    assert!(!summary.liked);
    assert_eq!(summary.like_count, 0);
}

#[tokio::test]
async fn toggle_follows_displayed_state() {
    let app = app();
    let user = app.create_user("u1");
    app.seed_post("p1", &user.session, "hello").await;

    let service = EngagementService::new(Arc::new(app.store.clone()));
    assert_eq!(
        service.toggle_like("p1", false, &user.session).await.unwrap(),
        LikeOutcome::Liked
    );
    assert!(service.is_liked("p1", &user.session).await.unwrap());
    assert_eq!(
        service.toggle_like("p1", true, &user.session).await.unwrap(),
        LikeOutcome::Unliked
    );
    assert!(!service.is_liked("p1", &user.session).await.unwrap());
}

#[tokio::test]
async fn live_view_reflects_like_and_unlike() {
    let app = app();
    let user = app.create_user("u1");
    app.seed_post("p1", &user.session, "hello").await;

    let view = PostView::mount(Arc::new(app.store.clone()), "p1");
    view.likes().ready().await.unwrap();
    let mut likes = view.likes().watch();

    let service = EngagementService::new(Arc::new(app.store.clone()));
    service.like_post("p1", &user.session).await.unwrap();
    likes
        .wait_for(|state| state.ready().map_or(false, |likes| likes.len() == 1))
        .await
        .unwrap();
    assert!(view.summary(Some(&user.session)).liked);

    service.unlike_post("p1", &user.session).await.unwrap();
    likes
        .wait_for(|state| state.ready().map_or(false, |likes| likes.is_empty()))
        .await
        .unwrap();
    let summary = view.summary(Some(&user.session));
    assert!(!summary.liked);
    assert_eq!(summary.like_count, 0);
}

#[tokio::test]
async fn other_users_like_does_not_mark_viewer() {
    let app = app();
    let viewer = app.create_user("u1");
    let other = app.create_user("u2");
    app.seed_post("p1", &viewer.session, "hello").await;

    let service = EngagementService::new(Arc::new(app.store.clone()));
    service.like_post("p1", &other.session).await.unwrap();

    let summary = service.summary("p1", Some(&viewer.session)).await.unwrap();
    assert!(!summary.liked);
    assert_eq!(summary.like_count, 1);
}

#[tokio::test]
async fn cannot_write_like_for_another_user() {
    let app = app();
    let user = app.create_user("u1");
    let store: Arc<dyn DocumentStore> = Arc::new(app.store.clone());

    let mut fields = serde_json::Map::new();
    fields.insert("username".into(), "User u1".into());
    let err = store
        .set_document(&Caller::from(&user.session), &DocumentPath::like("p1", "u2"), fields)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
}

// ===========================================================================
// HTTP
// ===========================================================================

#[tokio::test]
async fn http_toggle_like_round_trip() {
    let app = app();
    let user = app.create_user("u1");
    app.seed_post("p1", &user.session, "hello").await;

    let resp = app.post("/posts/p1/like", Some(&user.token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["liked"], true);

    let resp = app.post("/posts/p1/like", Some(&user.token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["liked"], false);
    assert_eq!(like_count(&app, "p1").await, 0);
}

#[tokio::test]
async fn http_explicit_like_is_idempotent() {
    let app = app();
    let user = app.create_user("u1");
    app.seed_post("p1", &user.session, "hello").await;

    for _ in 0..2 {
        let resp = app.put("/posts/p1/like", Some(&user.token)).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["liked"], true);
    }
    assert_eq!(like_count(&app, "p1").await, 1);

    for _ in 0..2 {
        let resp = app.delete("/posts/p1/like", Some(&user.token)).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["liked"], false);
    }
    assert_eq!(like_count(&app, "p1").await, 0);
}

#[tokio::test]
async fn http_like_requires_sign_in() {
    let app = app();
    let resp = app.put("/posts/p1/like", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "sign in required");
}
