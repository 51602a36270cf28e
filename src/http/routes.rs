use axum::{routing::get, routing::post, Router};

use crate::http::{handlers, live};
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new().route("/auth/sign-out", post(handlers::sign_out))
}

pub fn feed() -> Router<AppState> {
    Router::new()
        .route("/home", get(handlers::home))
        .route("/feed/live", get(live::feed_live))
        .route("/widgets", get(handlers::widgets))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route(
            "/posts/:id",
            get(handlers::get_post).delete(handlers::delete_post),
        )
        .route("/posts/:id/live", get(live::post_live))
        .route(
            "/posts/:id/like",
            post(handlers::toggle_like)
                .put(handlers::like_post)
                .delete(handlers::unlike_post),
        )
        .route("/posts/:id/comments", post(handlers::comment_post))
}
