use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::app::composer::{Draft, ImageAttachment, Submitted};
use crate::app::engagement::{EngagementService, LikeOutcome};
use crate::app::error::FeedError;
use crate::app::posts::PostService;
use crate::app::presence::EngagementSummary;
use crate::app::views::{PostDetail, PostView};
use crate::domain::icon::{post_actions, sidebar, PostAction, SidebarItem, SidebarLink};
use crate::domain::path::check_id;
use crate::domain::post::Post;
use crate::domain::session::Session;
use crate::http::{AppError, AuthUser};
use crate::infra::widgets::Widgets;
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Post id taken from the URL; percent-decoding can smuggle in a `/`.
pub(crate) fn post_id(Path(id): Path<String>) -> Result<String, AppError> {
    check_id(&id).map_err(|err| AppError::bad_request(err.to_string()))?;
    Ok(id)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub post: Post,
    pub summary: EngagementSummary,
    pub actions: Vec<PostAction>,
}

impl FeedItem {
    pub fn new(post: Post, summary: EngagementSummary, session: &Session) -> Self {
        let actions = post_actions(
            &post,
            session,
            summary.liked,
            summary.like_count,
            summary.comment_count,
        );
        Self {
            post,
            summary,
            actions,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomePage {
    pub session: Session,
    pub sidebar: Vec<SidebarLink>,
    pub posts: Vec<FeedItem>,
    pub widgets: Widgets,
}

async fn feed_items(
    state: &AppState,
    posts: Vec<Post>,
    session: &Session,
) -> Result<Vec<FeedItem>, FeedError> {
    let service = EngagementService::new(state.store.clone());
    let summaries = try_join_all(
        posts
            .iter()
            .map(|post| service.summary(&post.id, Some(session))),
    )
    .await?;

    Ok(posts
        .into_iter()
        .zip(summaries)
        .map(|(post, summary)| FeedItem::new(post, summary, session))
        .collect())
}

pub async fn home(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<HomePage>, AppError> {
    let posts = PostService::new(state.store.clone()).list_feed().await?;
    let (posts, widgets) = tokio::join!(
        feed_items(&state, posts, &auth.session),
        state.widgets.fetch(),
    );

    Ok(Json(HomePage {
        session: auth.session,
        sidebar: sidebar(SidebarItem::Home),
        posts: posts?,
        widgets,
    }))
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub text: String,
    /// `data:image/...;base64,...`
    pub image: Option<String>,
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Submitted>), AppError> {
    let image = payload
        .image
        .as_deref()
        .map(|data_url| ImageAttachment::from_data_url(data_url, state.upload_max_bytes))
        .transpose()?;
    let draft = Draft {
        text: payload.text,
        image,
        show_emojis: false,
    };

    let composer = state.composer_for(&auth.session);
    let submitted = composer.submit_draft(&auth.session, draft).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// Loads the detail page through a short-lived view of the post.
pub async fn get_post(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PostDetail>, AppError> {
    let id = post_id(path)?;
    let view = PostView::mount(state.store.clone(), &id);
    let loaded = tokio::try_join!(
        view.post().ready(),
        view.comments().ready(),
        view.likes().ready()
    );
    let detail = loaded
        .map_err(FeedError::Channel)
        .map(|_| view.detail(&auth.session));
    view.unmount();

    match detail? {
        Some(detail) => Ok(Json(detail)),
        None => Err(AppError::not_found("post not found")),
    }
}

pub async fn delete_post(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let id = post_id(path)?;
    PostService::new(state.store.clone())
        .delete_post(&id, &auth.session)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub liked: bool,
}

pub async fn toggle_like(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let id = post_id(path)?;
    let service = EngagementService::new(state.store.clone());
    let liked = service.is_liked(&id, &auth.session).await?;
    let outcome = service.toggle_like(&id, liked, &auth.session).await?;
    Ok(Json(LikeResponse {
        liked: outcome == LikeOutcome::Liked,
    }))
}

pub async fn like_post(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let id = post_id(path)?;
    EngagementService::new(state.store.clone())
        .like_post(&id, &auth.session)
        .await?;
    Ok(Json(LikeResponse { liked: true }))
}

pub async fn unlike_post(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let id = post_id(path)?;
    EngagementService::new(state.store.clone())
        .unlike_post(&id, &auth.session)
        .await?;
    Ok(Json(LikeResponse { liked: false }))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: String,
}

pub async fn comment_post(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), AppError> {
    let id = post_id(path)?;
    let comment_id = EngagementService::new(state.store.clone())
        .add_comment(&id, &auth.session, &payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(CommentResponse { id: comment_id })))
}

pub async fn widgets(State(state): State<AppState>) -> Json<Widgets> {
    Json(state.widgets.fetch().await)
}

pub async fn sign_out(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.identity.sign_out(&auth.token).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %auth.session.user_id, "failed to sign out");
        AppError::internal("failed to sign out")
    })?;
    state.drop_composer(&auth.session);
    Ok(StatusCode::NO_CONTENT)
}
