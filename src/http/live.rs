//! Server-sent event streams over live views.
//!
//! The view lives inside the stream, so a client disconnect drops it and
//! releases its subscriptions.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};

use crate::app::views::{FeedView, PostView, PostWatchers};
use crate::domain::session::Session;
use crate::http::handlers::{post_id, FeedItem};
use crate::http::{AppError, AuthUser};
use crate::AppState;

type EventResult = Result<Event, axum::Error>;

fn error_event(message: impl Into<String>) -> EventResult {
    Ok(Event::default().event("error").data(message.into()))
}

struct FeedStream {
    session: Session,
    view: FeedView,
    primed: bool,
    finished: bool,
}

/// Streams the feed, re-sent whenever the post list or any listed post's
/// likes or comments change.
pub async fn feed_live(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = EventResult>> {
    let feed = FeedStream {
        session: auth.session,
        view: FeedView::mount(state.store.clone()),
        primed: false,
        finished: false,
    };

    let events = stream::unfold(feed, |mut feed| async move {
        if feed.finished {
            return None;
        }
        loop {
            if feed.primed && !feed.view.changed().await {
                return None;
            }
            feed.primed = true;
            feed.view.sync();
            feed.view.mark_seen();

            if let Some(err) = feed.view.error() {
                feed.finished = true;
                feed.view.unmount();
                return Some((error_event(err.to_string()), feed));
            }
            if !feed.view.is_settled() {
                continue;
            }
            let items: Vec<FeedItem> = feed
                .view
                .entries(Some(&feed.session))
                .into_iter()
                .map(|(post, summary)| FeedItem::new(post, summary, &feed.session))
                .collect();
            return Some((Event::default().event("feed").json_data(items), feed));
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

struct DetailStream {
    session: Session,
    view: PostView,
    watchers: PostWatchers,
    primed: bool,
    finished: bool,
}

pub async fn post_live(
    path: Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = EventResult>>, AppError> {
    let id = post_id(path)?;
    let view = PostView::mount(state.store.clone(), &id);
    let watchers = view.watchers();
    let detail = DetailStream {
        session: auth.session,
        view,
        watchers,
        primed: false,
        finished: false,
    };

    let events = stream::unfold(detail, |mut detail| async move {
        if detail.finished {
            return None;
        }
        loop {
            if detail.primed && !detail.watchers.changed().await {
                return None;
            }
            detail.primed = true;
            detail.watchers.mark_seen();

            if let Some(err) = detail.view.error() {
                detail.finished = true;
                detail.view.unmount();
                return Some((error_event(err.to_string()), detail));
            }
            if detail.view.post().state().is_loading() {
                continue;
            }
            let event = match detail.view.detail(&detail.session) {
                Some(page) => Event::default().event("post").json_data(page),
                None => {
                    detail.finished = true;
                    detail.view.unmount();
                    Ok(Event::default().event("deleted").data(detail.view.post_id()))
                }
            };
            return Some((event, detail));
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
