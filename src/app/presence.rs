use serde::Serialize;

use crate::domain::engagement::Like;
use crate::domain::session::Session;

/// Whether `session` has a like in the current like snapshot.
pub fn has_liked(likes: &[Like], session: Option<&Session>) -> bool {
    match session {
        Some(session) => likes.iter().any(|like| like.user_id == session.user_id),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSummary {
    pub liked: bool,
    pub like_count: usize,
    pub comment_count: usize,
}

impl EngagementSummary {
    /// Snapshots may come from channels that updated at different times;
    /// each figure is only as fresh as the snapshot it was read from.
    pub fn compute(likes: &[Like], comment_count: usize, session: Option<&Session>) -> Self {
        Self {
            liked: has_liked(likes, session),
            like_count: likes.len(),
            comment_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(user_id: &str) -> Like {
        Like {
            user_id: user_id.into(),
            username: format!("{} name", user_id),
        }
    }

    #[test]
    fn liked_when_session_user_present() {
        let session = Session::new("u1", "Ann", "ann");
        let likes = vec![like("u2"), like("u1")];
        let summary = EngagementSummary::compute(&likes, 4, Some(&session));
        assert!(summary.liked);
        assert_eq!(summary.like_count, 2);
        assert_eq!(summary.comment_count, 4);
    }

    #[test]
    fn signed_out_viewer_never_liked() {
        assert!(!has_liked(&[like("u1")], None));
        let other = Session::new("u3", "Cy", "cy");
        assert!(!has_liked(&[like("u1")], Some(&other)));
    }
}
