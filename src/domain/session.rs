use serde::{Deserialize, Serialize};

/// The signed-in user, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub handle: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            avatar_url: None,
            handle: handle.into(),
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}
