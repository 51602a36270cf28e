use serde::Serialize;

use crate::domain::post::Post;
use crate::domain::session::Session;

/// Interactive icons rendered under a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IconKind {
    Comment,
    Delete,
    Retweet,
    Like,
    Share,
    Chart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostAction {
    pub kind: IconKind,
    /// Filled variant (a liked heart).
    pub active: bool,
    /// Counter shown next to the icon, hidden when zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl PostAction {
    fn plain(kind: IconKind) -> Self {
        Self {
            kind,
            active: false,
            count: None,
        }
    }
}

fn visible_count(count: usize) -> Option<usize> {
    (count > 0).then_some(count)
}

/// Icon row for a post as seen by `session`.
pub fn post_actions(
    post: &Post,
    session: &Session,
    liked: bool,
    like_count: usize,
    comment_count: usize,
) -> Vec<PostAction> {
    let ownership = if post.is_authored_by(session) {
        IconKind::Delete
    } else {
        IconKind::Retweet
    };

    vec![
        PostAction {
            kind: IconKind::Comment,
            active: false,
            count: visible_count(comment_count),
        },
        PostAction::plain(ownership),
        PostAction {
            kind: IconKind::Like,
            active: liked,
            count: visible_count(like_count),
        },
        PostAction::plain(IconKind::Share),
        PostAction::plain(IconKind::Chart),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebarItem {
    Home,
    Explore,
    Notifications,
    Messages,
    Bookmarks,
    Lists,
    Profile,
    More,
}

impl SidebarItem {
    pub const ALL: [SidebarItem; 8] = [
        SidebarItem::Home,
        SidebarItem::Explore,
        SidebarItem::Notifications,
        SidebarItem::Messages,
        SidebarItem::Bookmarks,
        SidebarItem::Lists,
        SidebarItem::Profile,
        SidebarItem::More,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SidebarItem::Home => "Home",
            SidebarItem::Explore => "Explore",
            SidebarItem::Notifications => "Notifications",
            SidebarItem::Messages => "Messages",
            SidebarItem::Bookmarks => "Bookmarks",
            SidebarItem::Lists => "Lists",
            SidebarItem::Profile => "Profile",
            SidebarItem::More => "More",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SidebarLink {
    pub item: SidebarItem,
    pub label: &'static str,
    pub active: bool,
}

pub fn sidebar(active: SidebarItem) -> Vec<SidebarLink> {
    SidebarItem::ALL
        .iter()
        .map(|item| SidebarLink {
            item: *item,
            label: item.label(),
            active: *item == active,
        })
        .collect()
}
